//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, LogEmailAdapter, MockBlobStorage, MockCheckoutProvider, MockTranslationAdapter,
        OpenAiTranslationAdapter, PdfTextExtractor, ResendEmailAdapter, StripeCheckoutAdapter,
        VercelBlobAdapter,
    },
    adapters::{email::RESEND_API_URL, stripe_checkout::STRIPE_API_URL},
    config::{Config, ConfigError},
    error::ApiError,
    web::{build_router, Adapters, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use bridge_core::ports::{BlobStorage, CheckoutProvider, EmailService, TranslationService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Uses `real` when its key is configured, the development stand-in when
/// running in development, and otherwise fails with the missing variable.
fn pick<T: ?Sized>(
    config: &Config,
    var: &str,
    real: Option<Arc<T>>,
    mock: impl FnOnce() -> Arc<T>,
) -> Result<Arc<T>, ApiError> {
    match real {
        Some(adapter) => Ok(adapter),
        None if config.is_development() => {
            warn!("{} is not set; using the development stand-in", var);
            Ok(mock())
        }
        None => Err(ConfigError::MissingVar(var.to_string()).into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(env = ?config.app_env, "Configuration loaded. Starting server...");

    if !config.is_development() && config.stripe_webhook_secret.is_none() {
        return Err(ConfigError::MissingVar("STRIPE_WEBHOOK_SECRET".to_string()).into());
    }

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {e}")))?;

    let translator: Arc<dyn TranslationService> = pick(
        &config,
        "OPENAI_API_KEY",
        config.openai_api_key.as_ref().map(|key| {
            let openai_config = OpenAIConfig::new().with_api_key(key);
            let client = Client::with_config(openai_config).with_http_client(http.clone());
            Arc::new(OpenAiTranslationAdapter::new(
                client,
                config.translation_model.clone(),
            )) as Arc<dyn TranslationService>
        }),
        || Arc::new(MockTranslationAdapter),
    )?;

    let blob: Arc<dyn BlobStorage> = pick(
        &config,
        "BLOB_READ_WRITE_TOKEN",
        config.blob_token.as_ref().map(|token| {
            Arc::new(VercelBlobAdapter::new(
                http.clone(),
                config.blob_api_url.clone(),
                token.clone(),
                config.blob_public_host.clone(),
            )) as Arc<dyn BlobStorage>
        }),
        || Arc::new(MockBlobStorage::new()),
    )?;

    let email: Arc<dyn EmailService> = pick(
        &config,
        "RESEND_API_KEY",
        config.resend_api_key.as_ref().map(|key| {
            Arc::new(ResendEmailAdapter::new(
                http.clone(),
                RESEND_API_URL.to_string(),
                key.clone(),
                config.email_from.clone(),
            )) as Arc<dyn EmailService>
        }),
        || Arc::new(LogEmailAdapter),
    )?;

    let checkout: Arc<dyn CheckoutProvider> = pick(
        &config,
        "STRIPE_SECRET_KEY",
        config.stripe_secret_key.as_ref().map(|key| {
            Arc::new(StripeCheckoutAdapter::new(
                http.clone(),
                STRIPE_API_URL.to_string(),
                key.clone(),
            )) as Arc<dyn CheckoutProvider>
        }),
        || Arc::new(MockCheckoutProvider),
    )?;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Adapters {
            db: db_adapter,
            blob,
            extractor: Arc::new(PdfTextExtractor),
            translator,
            email,
            checkout,
        },
    ));

    // --- 5. Create the Web Router ---
    let app = build_router(app_state)?;

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
