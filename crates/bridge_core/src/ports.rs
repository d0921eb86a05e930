//! crates/bridge_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{
    Document, DocumentDomain, DocumentListing, DocumentResult, EmailMessage, NewDocument,
    NewResult, NewShare, NewUser, Share, Summary, SubscriptionStatus, SubscriptionUpdate,
    UsageSnapshot, User, WebhookFailure,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A conditional usage increment found the account already at its limit.
    #[error("Translation quota exhausted")]
    QuotaExceeded,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users ---
    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<User>;

    async fn get_user_by_customer_id(&self, customer_id: &str) -> PortResult<User>;

    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, new_user: NewUser) -> PortResult<User>;

    async fn link_billing_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
        subscription_id: Option<&str>,
    ) -> PortResult<()>;

    /// Applies a subscription change to the user holding `customer_id`.
    async fn apply_subscription_update(
        &self,
        customer_id: &str,
        update: &SubscriptionUpdate,
    ) -> PortResult<User>;

    async fn set_subscription_status(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> PortResult<()>;

    // --- Auth provider sessions (read only) ---
    async fn validate_auth_session(&self, token: &str, now: DateTime<Utc>) -> PortResult<Uuid>;

    // --- Usage ledger ---
    /// Increments the user's translation count by one if and only if it is
    /// below the limit, as a single conditional update. Returns
    /// `QuotaExceeded` when no increment happened.
    async fn record_usage(&self, user_id: Uuid) -> PortResult<UsageSnapshot>;

    // --- Documents ---
    async fn create_document(&self, new_document: NewDocument) -> PortResult<Document>;

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document>;

    /// The owner's documents, newest first.
    async fn list_documents(&self, owner_id: Uuid) -> PortResult<Vec<DocumentListing>>;

    async fn delete_document(&self, document_id: Uuid) -> PortResult<()>;

    // --- Results ---
    async fn get_result_by_document(&self, document_id: Uuid) -> PortResult<DocumentResult>;

    /// Inserts the result and records one unit of usage for `new_result.user_id`
    /// in a single transaction. Fails with `QuotaExceeded` (nothing written) when
    /// the account is at its limit, and with `Conflict` when the document already
    /// has a result.
    async fn save_result_with_usage(
        &self,
        new_result: NewResult,
    ) -> PortResult<(DocumentResult, UsageSnapshot)>;

    async fn delete_result(&self, document_id: Uuid) -> PortResult<()>;

    // --- Shares ---
    async fn create_share(&self, new_share: NewShare) -> PortResult<Share>;

    async fn get_share_by_token(&self, token: &str) -> PortResult<Share>;

    /// Increments the view counter and stamps `last_viewed_at`.
    async fn record_share_view(&self, share_id: Uuid, viewed_at: DateTime<Utc>) -> PortResult<Share>;

    // --- Webhook dead letters ---
    async fn record_webhook_failure(&self, failure: WebhookFailure) -> PortResult<()>;
}

//=========================================================================================
// Blob Storage
//=========================================================================================

/// Where a blob ended up after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    pub pathname: String,
    pub content_type: String,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Writes `data` under `pathname` and returns its durable public URL.
    async fn put(&self, pathname: &str, data: Bytes, content_type: &str) -> PortResult<StoredBlob>;

    /// Downloads the bytes behind a durable URL.
    async fn fetch(&self, url: &str) -> PortResult<Bytes>;

    async fn delete(&self, url: &str) -> PortResult<()>;

    /// Whether `url` points into this store. Client-supplied URLs outside it
    /// are never registered or fetched.
    fn holds_url(&self, url: &str) -> bool;
}

//=========================================================================================
// Text Extraction
//=========================================================================================

/// Extracts the text layer of a PDF, one entry per page in document order.
///
/// Implementations are CPU-bound and are called from the blocking pool.
pub trait TextExtractor: Send + Sync {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> PortResult<Vec<String>>;
}

//=========================================================================================
// Structured Generation
//=========================================================================================

/// What the generation service is asked to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationInput {
    /// Text extracted from a document.
    Text(String),
    /// A durable URL of an image the service reads directly.
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub input: GenerationInput,
    pub target_language: String,
    pub domain: Option<DocumentDomain>,
}

/// The generation service's answer before validation. Every field may be
/// missing in a malformed response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranslation {
    #[serde(default)]
    pub translation_html: Option<String>,
    #[serde(default)]
    pub summary: Option<Summary>,
    #[serde(default)]
    pub detected_language: Option<String>,
}

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Issues exactly one structured-output call.
    async fn generate(&self, request: &GenerationRequest) -> PortResult<RawTranslation>;
}

//=========================================================================================
// Email
//=========================================================================================

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> PortResult<()>;
}

//=========================================================================================
// Billing Checkout
//=========================================================================================

/// A hosted subscription checkout to open for a prospective customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub customer_email: String,
    pub price_id: String,
    pub trial_period_days: u32,
    /// May contain the provider's `{CHECKOUT_SESSION_ID}` placeholder.
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    /// Where the customer is sent to pay.
    pub url: String,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PortResult<CheckoutSession>;
}
