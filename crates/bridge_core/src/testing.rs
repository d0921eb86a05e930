//! crates/bridge_core/src/testing.rs
//!
//! In-memory port implementations for tests, here and in the api crate.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    Document, DocumentDomain, DocumentListing, DocumentResult, EmailMessage, NewDocument,
    NewResult, NewShare, NewUser, Role, Share, SubscriptionPlan, SubscriptionStatus,
    SubscriptionUpdate, Summary, UsageSnapshot, User, WebhookFailure,
};
use crate::ports::{
    BlobStorage, CheckoutProvider, CheckoutRequest, CheckoutSession, DatabaseService,
    EmailService, GenerationRequest, PortError, PortResult, RawTranslation, StoredBlob,
    TextExtractor, TranslationService,
};
use crate::usage::translation_limit;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// Fixtures
//=========================================================================================

/// A customer on `plan` with no usage. Paid plans come with an active
/// subscription.
pub fn sample_user(plan: SubscriptionPlan) -> User {
    let now = Utc::now();
    let id = Uuid::new_v4();
    User {
        id,
        email: format!("user-{}@example.com", id.simple()),
        name: "Sample User".into(),
        email_verified: true,
        role: Role::Customer,
        subscription_plan: plan,
        subscription_status: (plan != SubscriptionPlan::Free).then_some(SubscriptionStatus::Active),
        subscription_start_date: None,
        subscription_end_date: None,
        trial_ends_at: None,
        translation_count: 0,
        translation_limit: translation_limit(Some(plan)),
        stripe_customer_id: None,
        stripe_subscription_id: None,
        banned: false,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_summary() -> Summary {
    Summary {
        purpose: "Invitation to a parent-teacher meeting".into(),
        actions: vec![
            "Confirm attendance with the school office".into(),
            "Bring the signed permission slip".into(),
        ],
        due_dates: Some(vec!["March 12 at 6 PM".into()]),
        costs: None,
    }
}

pub fn sample_raw_translation() -> RawTranslation {
    RawTranslation {
        translation_html: Some(
            "<h1>Parent-teacher meeting</h1><p>The meeting is on March 12 at 6 PM.</p>".into(),
        ),
        summary: Some(sample_summary()),
        detected_language: Some("fr".into()),
    }
}

pub fn sample_result(document_id: Uuid) -> DocumentResult {
    DocumentResult {
        id: Uuid::new_v4(),
        document_id,
        translation_html: "<p>The meeting is on March 12.</p>".into(),
        summary: sample_summary(),
        detected_language: "fr".into(),
        target_language: "en".into(),
        domain: Some(DocumentDomain::School),
        confidence: 85,
        processing_time_ms: 1_200,
        created_at: Utc::now(),
    }
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
struct DbState {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    documents: Vec<Document>,
    results: Vec<DocumentResult>,
    shares: Vec<Share>,
    webhook_failures: Vec<WebhookFailure>,
}

impl DbState {
    fn user_mut(&mut self, user_id: Uuid) -> PortResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))
    }

    fn customer_mut(&mut self, customer_id: &str) -> PortResult<&mut User> {
        self.users
            .values_mut()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .ok_or_else(|| PortError::NotFound(format!("customer {customer_id}")))
    }

    fn increment_usage(&mut self, user_id: Uuid) -> PortResult<UsageSnapshot> {
        let user = self.user_mut(user_id)?;
        if user.translation_count >= user.translation_limit {
            return Err(PortError::QuotaExceeded);
        }
        user.translation_count += 1;
        user.updated_at = Utc::now();
        Ok(UsageSnapshot {
            count: user.translation_count,
            limit: user.translation_limit,
        })
    }
}

#[derive(Default)]
pub struct InMemoryDatabase {
    state: Mutex<DbState>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) -> Uuid {
        let id = user.id;
        lock(&self.state).users.insert(id, user);
        id
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        lock(&self.state).users.get(&user_id).cloned()
    }

    pub fn insert_session(&self, token: &str, user_id: Uuid, expires_at: DateTime<Utc>) {
        lock(&self.state)
            .sessions
            .insert(token.to_string(), (user_id, expires_at));
    }

    pub fn insert_document(&self, owner_id: Uuid, blob_url: &str, mime_type: &str) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            owner_id,
            family_id: None,
            blob_url: blob_url.to_string(),
            filename: blob_url.rsplit('/').next().unwrap_or(blob_url).to_string(),
            mime_type: mime_type.to_string(),
            file_size: 1_024,
            page_count: None,
            uploaded_at: Utc::now(),
        };
        lock(&self.state).documents.push(document.clone());
        document
    }

    pub fn insert_result(&self, result: DocumentResult) {
        lock(&self.state).results.push(result);
    }

    pub fn document_count(&self) -> usize {
        lock(&self.state).documents.len()
    }

    pub fn only_document_id(&self) -> Option<Uuid> {
        let state = lock(&self.state);
        match state.documents.as_slice() {
            [only] => Some(only.id),
            _ => None,
        }
    }

    pub fn result_count(&self) -> usize {
        lock(&self.state).results.len()
    }

    pub fn result_for(&self, document_id: Uuid) -> Option<DocumentResult> {
        lock(&self.state)
            .results
            .iter()
            .find(|r| r.document_id == document_id)
            .cloned()
    }

    pub fn share_count(&self) -> usize {
        lock(&self.state).shares.len()
    }

    pub fn share_by_token(&self, token: &str) -> Option<Share> {
        lock(&self.state).shares.iter().find(|s| s.token == token).cloned()
    }

    pub fn webhook_failures(&self) -> Vec<WebhookFailure> {
        lock(&self.state).webhook_failures.clone()
    }
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.user(user_id)
            .ok_or_else(|| PortError::NotFound(format!("user {user_id}")))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<User> {
        lock(&self.state)
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("user {email}")))
    }

    async fn get_user_by_customer_id(&self, customer_id: &str) -> PortResult<User> {
        lock(&self.state).customer_mut(customer_id).map(|u| u.clone())
    }

    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let mut state = lock(&self.state);
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(PortError::Conflict(format!("email {} is taken", new_user.email)));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            email_verified: false,
            role: new_user.role,
            subscription_plan: new_user.subscription_plan,
            subscription_status: None,
            subscription_start_date: None,
            subscription_end_date: None,
            trial_ends_at: None,
            translation_count: 0,
            translation_limit: new_user.translation_limit,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            banned: false,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn link_billing_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
        subscription_id: Option<&str>,
    ) -> PortResult<()> {
        let mut state = lock(&self.state);
        let user = state.user_mut(user_id)?;
        user.stripe_customer_id = Some(customer_id.to_string());
        if let Some(subscription_id) = subscription_id {
            user.stripe_subscription_id = Some(subscription_id.to_string());
        }
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_subscription_update(
        &self,
        customer_id: &str,
        update: &SubscriptionUpdate,
    ) -> PortResult<User> {
        let mut state = lock(&self.state);
        let user = state.customer_mut(customer_id)?;
        user.stripe_subscription_id = Some(update.subscription_id.clone());
        user.subscription_status = Some(update.status);
        user.subscription_plan = update.plan;
        user.translation_limit = update.translation_limit;
        user.subscription_start_date = update.period_start;
        user.subscription_end_date = update.period_end;
        user.trial_ends_at = update.trial_ends_at;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_subscription_status(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> PortResult<()> {
        let mut state = lock(&self.state);
        let user = state.customer_mut(customer_id)?;
        user.subscription_status = Some(status);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn validate_auth_session(&self, token: &str, now: DateTime<Utc>) -> PortResult<Uuid> {
        match lock(&self.state).sessions.get(token) {
            Some((user_id, expires_at)) if *expires_at > now => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn record_usage(&self, user_id: Uuid) -> PortResult<UsageSnapshot> {
        lock(&self.state).increment_usage(user_id)
    }

    async fn create_document(&self, new_document: NewDocument) -> PortResult<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            owner_id: new_document.owner_id,
            family_id: None,
            blob_url: new_document.blob_url,
            filename: new_document.filename,
            mime_type: new_document.mime_type,
            file_size: new_document.file_size,
            page_count: None,
            uploaded_at: Utc::now(),
        };
        lock(&self.state).documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        lock(&self.state)
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("document {document_id}")))
    }

    async fn list_documents(&self, owner_id: Uuid) -> PortResult<Vec<DocumentListing>> {
        let state = lock(&self.state);
        let mut listings: Vec<DocumentListing> = state
            .documents
            .iter()
            .filter(|d| d.owner_id == owner_id)
            .map(|d| {
                let result = state.results.iter().find(|r| r.document_id == d.id);
                DocumentListing {
                    document: d.clone(),
                    detected_language: result.map(|r| r.detected_language.clone()),
                    confidence: result.map(|r| r.confidence),
                }
            })
            .collect();
        listings.sort_by(|a, b| b.document.uploaded_at.cmp(&a.document.uploaded_at));
        Ok(listings)
    }

    async fn delete_document(&self, document_id: Uuid) -> PortResult<()> {
        let mut state = lock(&self.state);
        let before = state.documents.len();
        state.documents.retain(|d| d.id != document_id);
        if state.documents.len() == before {
            return Err(PortError::NotFound(format!("document {document_id}")));
        }
        state.shares.retain(|s| s.document_id != document_id);
        Ok(())
    }

    async fn get_result_by_document(&self, document_id: Uuid) -> PortResult<DocumentResult> {
        self.result_for(document_id)
            .ok_or_else(|| PortError::NotFound(format!("result for document {document_id}")))
    }

    async fn save_result_with_usage(
        &self,
        new_result: NewResult,
    ) -> PortResult<(DocumentResult, UsageSnapshot)> {
        let mut state = lock(&self.state);
        if state.results.iter().any(|r| r.document_id == new_result.document_id) {
            return Err(PortError::Conflict(format!(
                "document {} already has a result",
                new_result.document_id
            )));
        }
        let usage = state.increment_usage(new_result.user_id)?;
        let result = DocumentResult {
            id: Uuid::new_v4(),
            document_id: new_result.document_id,
            translation_html: new_result.translation_html,
            summary: new_result.summary,
            detected_language: new_result.detected_language,
            target_language: new_result.target_language,
            domain: new_result.domain,
            confidence: new_result.confidence,
            processing_time_ms: new_result.processing_time_ms,
            created_at: Utc::now(),
        };
        state.results.push(result.clone());
        Ok((result, usage))
    }

    async fn delete_result(&self, document_id: Uuid) -> PortResult<()> {
        lock(&self.state).results.retain(|r| r.document_id != document_id);
        Ok(())
    }

    async fn create_share(&self, new_share: NewShare) -> PortResult<Share> {
        let share = Share {
            id: Uuid::new_v4(),
            document_id: new_share.document_id,
            created_by: new_share.created_by,
            token: new_share.token,
            expires_at: new_share.expires_at,
            can_download: new_share.can_download,
            view_count: 0,
            last_viewed_at: None,
            created_at: Utc::now(),
        };
        lock(&self.state).shares.push(share.clone());
        Ok(share)
    }

    async fn get_share_by_token(&self, token: &str) -> PortResult<Share> {
        self.share_by_token(token)
            .ok_or_else(|| PortError::NotFound("share link not found".into()))
    }

    async fn record_share_view(&self, share_id: Uuid, viewed_at: DateTime<Utc>) -> PortResult<Share> {
        let mut state = lock(&self.state);
        let share = state
            .shares
            .iter_mut()
            .find(|s| s.id == share_id)
            .ok_or_else(|| PortError::NotFound(format!("share {share_id}")))?;
        share.view_count += 1;
        share.last_viewed_at = Some(viewed_at);
        Ok(share.clone())
    }

    async fn record_webhook_failure(&self, failure: WebhookFailure) -> PortResult<()> {
        lock(&self.state).webhook_failures.push(failure);
        Ok(())
    }
}

//=========================================================================================
// Blob storage
//=========================================================================================

pub const TEST_BLOB_BASE: &str = "https://blob.test";

#[derive(Default)]
pub struct InMemoryBlobStorage {
    blobs: Mutex<HashMap<String, Bytes>>,
    fail_deletes: Mutex<bool>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` directly and returns its URL.
    pub fn seed(&self, pathname: &str, data: &[u8]) -> String {
        let url = format!("{TEST_BLOB_BASE}/{pathname}");
        lock(&self.blobs).insert(url.clone(), Bytes::copy_from_slice(data));
        url
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        lock(&self.blobs).get(url).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_deletes(&self, fail: bool) {
        *lock(&self.fail_deletes) = fail;
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn put(&self, pathname: &str, data: Bytes, content_type: &str) -> PortResult<StoredBlob> {
        let url = format!("{TEST_BLOB_BASE}/{pathname}");
        lock(&self.blobs).insert(url.clone(), data);
        Ok(StoredBlob {
            url,
            pathname: pathname.to_string(),
            content_type: content_type.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        self.get(url)
            .ok_or_else(|| PortError::NotFound(format!("blob {url}")))
    }

    async fn delete(&self, url: &str) -> PortResult<()> {
        if *lock(&self.fail_deletes) {
            return Err(PortError::Unexpected("blob store unavailable".into()));
        }
        lock(&self.blobs).remove(url);
        Ok(())
    }

    fn holds_url(&self, url: &str) -> bool {
        url.strip_prefix(TEST_BLOB_BASE)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

//=========================================================================================
// Extraction and generation stubs
//=========================================================================================

pub struct StubExtractor {
    outcome: Result<Vec<String>, String>,
}

impl StubExtractor {
    pub fn pages(pages: &[&str]) -> Self {
        Self {
            outcome: Ok(pages.iter().map(|p| p.to_string()).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
        }
    }
}

impl TextExtractor for StubExtractor {
    fn extract_pages(&self, _pdf_bytes: &[u8]) -> PortResult<Vec<String>> {
        self.outcome.clone().map_err(PortError::Unexpected)
    }
}

/// Returns a canned response and remembers what it was asked.
pub struct StubTranslator {
    response: Mutex<Result<RawTranslation, String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubTranslator {
    pub fn returning(raw: RawTranslation) -> Self {
        Self {
            response: Mutex::new(Ok(raw)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(message.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_response(&self, raw: RawTranslation) {
        *lock(&self.response) = Ok(raw);
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl TranslationService for StubTranslator {
    async fn generate(&self, request: &GenerationRequest) -> PortResult<RawTranslation> {
        lock(&self.requests).push(request.clone());
        lock(&self.response).clone().map_err(PortError::Unexpected)
    }
}

//=========================================================================================
// Email
//=========================================================================================

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl EmailService for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> PortResult<()> {
        if self.fail {
            return Err(PortError::Unexpected("mail provider rejected the message".into()));
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}

//=========================================================================================
// Checkout
//=========================================================================================

/// Records checkout requests and answers with numbered sessions.
#[derive(Default)]
pub struct RecordingCheckout {
    requests: Mutex<Vec<CheckoutRequest>>,
    fail: bool,
}

impl RecordingCheckout {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that rejects every request.
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CheckoutProvider for RecordingCheckout {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PortResult<CheckoutSession> {
        if self.fail {
            return Err(PortError::Unexpected("No such price".into()));
        }
        let mut requests = lock(&self.requests);
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/c/pay/{id}"),
            id,
        })
    }
}
