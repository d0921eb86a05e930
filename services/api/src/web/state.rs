//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use bridge_core::billing::{BillingWebhookProcessor, CheckoutService};
use bridge_core::ingestion::DocumentIngestion;
use bridge_core::pipeline::TranslationPipeline;
use bridge_core::ports::{
    BlobStorage, CheckoutProvider, DatabaseService, EmailService, TextExtractor,
    TranslationService,
};
use bridge_core::sharing::ResultStore;
use bridge_core::usage::UsageLedger;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub ingestion: DocumentIngestion,
    pub pipeline: TranslationPipeline,
    pub results: ResultStore,
    pub ledger: UsageLedger,
    pub billing: BillingWebhookProcessor,
    pub checkout: CheckoutService,
}

/// The adapters the services are built from.
pub struct Adapters {
    pub db: Arc<dyn DatabaseService>,
    pub blob: Arc<dyn BlobStorage>,
    pub extractor: Arc<dyn TextExtractor>,
    pub translator: Arc<dyn TranslationService>,
    pub email: Arc<dyn EmailService>,
    pub checkout: Arc<dyn CheckoutProvider>,
}

impl AppState {
    pub fn new(config: Arc<Config>, adapters: Adapters) -> Self {
        let Adapters {
            db,
            blob,
            extractor,
            translator,
            email,
            checkout,
        } = adapters;

        Self {
            ingestion: DocumentIngestion::new(db.clone(), blob.clone()),
            pipeline: TranslationPipeline::new(db.clone(), blob, extractor, translator),
            results: ResultStore::new(db.clone(), config.app_url.clone()),
            ledger: UsageLedger::new(db.clone()),
            checkout: CheckoutService::new(
                checkout,
                config.prices.clone(),
                config.app_url.clone(),
            ),
            billing: BillingWebhookProcessor::new(
                db.clone(),
                email,
                config.prices.clone(),
                config.app_url.clone(),
            ),
            db,
            config,
        }
    }
}
