//! services/api/src/adapters/mock.rs
//!
//! Stand-ins used only when `APP_ENV=development` and the matching provider
//! key is absent. `bin/api.rs` never wires these in production.

use async_trait::async_trait;
use bridge_core::domain::{EmailMessage, Summary};
use bridge_core::billing::CHECKOUT_SESSION_PLACEHOLDER;
use bridge_core::ports::{
    BlobStorage, CheckoutProvider, CheckoutRequest, CheckoutSession, EmailService,
    GenerationRequest, PortError, PortResult, RawTranslation, StoredBlob, TranslationService,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

pub const MOCK_BLOB_BASE: &str = "https://blob.vercel-storage.com/mock";

/// Returns a fixed placeholder translation without calling any provider.
#[derive(Clone, Copy, Default)]
pub struct MockTranslationAdapter;

#[async_trait]
impl TranslationService for MockTranslationAdapter {
    async fn generate(&self, request: &GenerationRequest) -> PortResult<RawTranslation> {
        info!(target_language = %request.target_language, "Returning mock translation");
        Ok(RawTranslation {
            translation_html: Some(
                "<h1>Sample Translated Document</h1>\
                 <p>This is a mock translation for development purposes.</p>\
                 <ul><li>Set OPENAI_API_KEY to enable real translations</li></ul>"
                    .to_string(),
            ),
            summary: Some(Summary {
                purpose: "This is a mock translation result for development testing".to_string(),
                actions: vec![
                    "Set up the OPENAI_API_KEY environment variable".to_string(),
                    "Test with real documents".to_string(),
                ],
                due_dates: Some(vec!["No real dates - this is a mock".to_string()]),
                costs: Some(vec!["No costs - development mode".to_string()]),
            }),
            detected_language: Some("en".to_string()),
        })
    }
}

/// Keeps uploads in process memory for the lifetime of the server.
#[derive(Default)]
pub struct MockBlobStorage {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MockBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStorage for MockBlobStorage {
    async fn put(&self, pathname: &str, data: Bytes, content_type: &str) -> PortResult<StoredBlob> {
        let url = format!("{MOCK_BLOB_BASE}/{pathname}");
        info!(%url, size = data.len(), "Stored mock blob");
        self.blobs().insert(url.clone(), data);
        Ok(StoredBlob {
            url,
            pathname: pathname.to_string(),
            content_type: content_type.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        self.blobs()
            .get(url)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("mock blob {url}")))
    }

    async fn delete(&self, url: &str) -> PortResult<()> {
        self.blobs().remove(url);
        Ok(())
    }

    fn holds_url(&self, url: &str) -> bool {
        url.strip_prefix(MOCK_BLOB_BASE)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Logs outgoing emails instead of sending them.
#[derive(Clone, Copy, Default)]
pub struct LogEmailAdapter;

#[async_trait]
impl EmailService for LogEmailAdapter {
    async fn send(&self, message: &EmailMessage) -> PortResult<()> {
        info!(to = %message.to, subject = %message.subject, "Email not sent (no provider configured)");
        Ok(())
    }
}

/// Skips the payment page: the checkout URL is the success URL itself.
#[derive(Clone, Copy, Default)]
pub struct MockCheckoutProvider;

#[async_trait]
impl CheckoutProvider for MockCheckoutProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PortResult<CheckoutSession> {
        let id = format!("cs_mock_{}", Uuid::new_v4().simple());
        info!(email = %request.customer_email, price_id = %request.price_id, "Created mock checkout session");
        Ok(CheckoutSession {
            url: request.success_url.replace(CHECKOUT_SESSION_PLACEHOLDER, &id),
            id,
        })
    }
}
