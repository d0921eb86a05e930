//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use bridge_core::domain::{
    Document, DocumentDomain, DocumentListing, DocumentResult, NewDocument, NewResult, NewShare,
    NewUser, Share, SubscriptionStatus, SubscriptionUpdate, Summary, UsageSnapshot, User,
    WebhookFailure,
};
use bridge_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps driver errors onto port errors. `what` names the row for messages.
fn db_error(what: &str) -> impl FnOnce(sqlx::Error) -> PortError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{what} not found")),
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{what} already exists"))
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_column<T>(value: &str) -> PortResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| PortError::Unexpected(format!("corrupt row: {e}")))
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "id, email, name, email_verified, role, subscription_plan, \
    subscription_status, subscription_start_date, subscription_end_date, trial_ends_at, \
    translation_count, translation_limit, stripe_customer_id, stripe_subscription_id, banned, \
    created_at, updated_at";

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    name: String,
    email_verified: bool,
    role: String,
    subscription_plan: String,
    subscription_status: Option<String>,
    subscription_start_date: Option<DateTime<Utc>>,
    subscription_end_date: Option<DateTime<Utc>>,
    trial_ends_at: Option<DateTime<Utc>>,
    translation_count: i32,
    translation_limit: i32,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    banned: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            email: self.email,
            name: self.name,
            email_verified: self.email_verified,
            role: parse_column(&self.role)?,
            subscription_plan: parse_column(&self.subscription_plan)?,
            subscription_status: self
                .subscription_status
                .as_deref()
                .map(parse_column::<SubscriptionStatus>)
                .transpose()?,
            subscription_start_date: self.subscription_start_date,
            subscription_end_date: self.subscription_end_date,
            trial_ends_at: self.trial_ends_at,
            translation_count: to_u32(self.translation_count),
            translation_limit: to_u32(self.translation_limit),
            stripe_customer_id: self.stripe_customer_id,
            stripe_subscription_id: self.stripe_subscription_id,
            banned: self.banned,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UsageRecord {
    translation_count: i32,
    translation_limit: i32,
}
impl UsageRecord {
    fn to_domain(self) -> UsageSnapshot {
        UsageSnapshot {
            count: to_u32(self.translation_count),
            limit: to_u32(self.translation_limit),
        }
    }
}

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, family_id, blob_url, filename, mime_type, file_size, page_count, uploaded_at";

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    owner_id: Uuid,
    family_id: Option<Uuid>,
    blob_url: String,
    filename: String,
    mime_type: String,
    file_size: i64,
    page_count: Option<i32>,
    uploaded_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            owner_id: self.owner_id,
            family_id: self.family_id,
            blob_url: self.blob_url,
            filename: self.filename,
            mime_type: self.mime_type,
            file_size: u64::try_from(self.file_size).unwrap_or(0),
            page_count: self.page_count.and_then(|p| u32::try_from(p).ok()),
            uploaded_at: self.uploaded_at,
        }
    }
}

#[derive(FromRow)]
struct ListingRecord {
    #[sqlx(flatten)]
    document: DocumentRecord,
    detected_language: Option<String>,
    confidence: Option<i16>,
}
impl ListingRecord {
    fn to_domain(self) -> DocumentListing {
        DocumentListing {
            document: self.document.to_domain(),
            detected_language: self.detected_language,
            confidence: self.confidence.and_then(|c| u8::try_from(c).ok()),
        }
    }
}

const RESULT_COLUMNS: &str = "id, document_id, translation_html, summary, detected_language, \
    target_language, domain, confidence, processing_time_ms, created_at";

#[derive(FromRow)]
struct ResultRecord {
    id: Uuid,
    document_id: Uuid,
    translation_html: String,
    summary: Json<Summary>,
    detected_language: String,
    target_language: String,
    domain: Option<String>,
    confidence: i16,
    processing_time_ms: i64,
    created_at: DateTime<Utc>,
}
impl ResultRecord {
    fn to_domain(self) -> PortResult<DocumentResult> {
        Ok(DocumentResult {
            id: self.id,
            document_id: self.document_id,
            translation_html: self.translation_html,
            summary: self.summary.0,
            detected_language: self.detected_language,
            target_language: self.target_language,
            domain: self
                .domain
                .as_deref()
                .map(parse_column::<DocumentDomain>)
                .transpose()?,
            confidence: u8::try_from(self.confidence).unwrap_or(0),
            processing_time_ms: u64::try_from(self.processing_time_ms).unwrap_or(0),
            created_at: self.created_at,
        })
    }
}

/// Sessions live in the auth provider's `session` table.
const SESSION_LOOKUP: &str =
    r#"SELECT user_id FROM "session" WHERE token = $1 AND expires_at > $2"#;

const SHARE_COLUMNS: &str = "id, document_id, created_by, token, expires_at, can_download, \
    view_count, last_viewed_at, created_at";

#[derive(FromRow)]
struct ShareRecord {
    id: Uuid,
    document_id: Uuid,
    created_by: Uuid,
    token: String,
    expires_at: DateTime<Utc>,
    can_download: bool,
    view_count: i32,
    last_viewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl ShareRecord {
    fn to_domain(self) -> Share {
        Share {
            id: self.id,
            document_id: self.document_id,
            created_by: self.created_by,
            token: self.token,
            expires_at: self.expires_at,
            can_download: self.can_download,
            view_count: to_u32(self.view_count),
            last_viewed_at: self.last_viewed_at,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// Usage accounting shared by the standalone and transactional paths
//=========================================================================================

/// The conditional increment: succeeds only while `count < limit`.
async fn increment_usage(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> PortResult<UsageSnapshot> {
    let updated = sqlx::query_as::<_, UsageRecord>(
        "UPDATE users SET translation_count = translation_count + 1, updated_at = NOW() \
         WHERE id = $1 AND translation_count < translation_limit \
         RETURNING translation_count, translation_limit",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_error("User"))?;

    if let Some(record) = updated {
        return Ok(record.to_domain());
    }

    // No row changed: either the user is missing or already at the limit.
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("User"))?;
    match exists {
        Some(_) => Err(PortError::QuotaExceeded),
        None => Err(PortError::NotFound(format!("User {user_id} not found"))),
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("User"))?
            .to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("User"))?
        .to_domain()
    }

    async fn get_user_by_customer_id(&self, customer_id: &str) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE stripe_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Billing customer"))?
        .to_domain()
    }

    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (id, email, name, role, subscription_plan, translation_limit) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(new_user.role.as_str())
        .bind(new_user.subscription_plan.as_str())
        .bind(i32::try_from(new_user.translation_limit).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("User with this email"))?
        .to_domain()
    }

    async fn link_billing_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
        subscription_id: Option<&str>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET stripe_customer_id = $2, \
             stripe_subscription_id = COALESCE($3, stripe_subscription_id), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(customer_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Billing customer"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {user_id} not found")));
        }
        Ok(())
    }

    async fn apply_subscription_update(
        &self,
        customer_id: &str,
        update: &SubscriptionUpdate,
    ) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "UPDATE users SET stripe_subscription_id = $2, subscription_status = $3, \
             subscription_plan = $4, translation_limit = $5, subscription_start_date = $6, \
             subscription_end_date = $7, trial_ends_at = $8, updated_at = NOW() \
             WHERE stripe_customer_id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(customer_id)
        .bind(&update.subscription_id)
        .bind(update.status.as_str())
        .bind(update.plan.as_str())
        .bind(i32::try_from(update.translation_limit).unwrap_or(i32::MAX))
        .bind(update.period_start)
        .bind(update.period_end)
        .bind(update.trial_ends_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Billing customer"))?
        .to_domain()
    }

    async fn set_subscription_status(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET subscription_status = $2, updated_at = NOW() \
             WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Billing customer"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Billing customer {customer_id} not found"
            )));
        }
        Ok(())
    }

    async fn validate_auth_session(&self, token: &str, now: DateTime<Utc>) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(SESSION_LOOKUP)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Session"))?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn record_usage(&self, user_id: Uuid) -> PortResult<UsageSnapshot> {
        let mut tx = self.pool.begin().await.map_err(db_error("Transaction"))?;
        let usage = increment_usage(&mut tx, user_id).await?;
        tx.commit().await.map_err(db_error("Transaction"))?;
        Ok(usage)
    }

    async fn create_document(&self, new_document: NewDocument) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "INSERT INTO documents (id, owner_id, blob_url, filename, mime_type, file_size) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_document.owner_id)
        .bind(&new_document.blob_url)
        .bind(&new_document.filename)
        .bind(&new_document.mime_type)
        .bind(i64::try_from(new_document.file_size).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Document"))?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Document"))?;
        Ok(record.to_domain())
    }

    async fn list_documents(&self, owner_id: Uuid) -> PortResult<Vec<DocumentListing>> {
        let records = sqlx::query_as::<_, ListingRecord>(
            "SELECT d.id, d.owner_id, d.family_id, d.blob_url, d.filename, d.mime_type, \
             d.file_size, d.page_count, d.uploaded_at, r.detected_language, r.confidence \
             FROM documents d LEFT JOIN results r ON r.document_id = d.id \
             WHERE d.owner_id = $1 ORDER BY d.uploaded_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Document"))?;
        Ok(records.into_iter().map(ListingRecord::to_domain).collect())
    }

    async fn delete_document(&self, document_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Document"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {document_id} not found")));
        }
        Ok(())
    }

    async fn get_result_by_document(&self, document_id: Uuid) -> PortResult<DocumentResult> {
        sqlx::query_as::<_, ResultRecord>(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE document_id = $1"
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Result"))?
        .to_domain()
    }

    async fn save_result_with_usage(
        &self,
        new_result: NewResult,
    ) -> PortResult<(DocumentResult, UsageSnapshot)> {
        let mut tx = self.pool.begin().await.map_err(db_error("Transaction"))?;

        // Dropping `tx` on any early return rolls both writes back.
        let usage = increment_usage(&mut tx, new_result.user_id).await?;
        let record = sqlx::query_as::<_, ResultRecord>(&format!(
            "INSERT INTO results (id, document_id, translation_html, summary, detected_language, \
             target_language, domain, confidence, processing_time_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {RESULT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_result.document_id)
        .bind(&new_result.translation_html)
        .bind(Json(&new_result.summary))
        .bind(&new_result.detected_language)
        .bind(&new_result.target_language)
        .bind(new_result.domain.map(|d| d.as_str()))
        .bind(i16::from(new_result.confidence))
        .bind(i64::try_from(new_result.processing_time_ms).unwrap_or(i64::MAX))
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Result for this document"))?;

        tx.commit().await.map_err(db_error("Transaction"))?;
        Ok((record.to_domain()?, usage))
    }

    async fn delete_result(&self, document_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM results WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Result"))?;
        Ok(())
    }

    async fn create_share(&self, new_share: NewShare) -> PortResult<Share> {
        let record = sqlx::query_as::<_, ShareRecord>(&format!(
            "INSERT INTO shares (id, document_id, created_by, token, expires_at, can_download) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SHARE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new_share.document_id)
        .bind(new_share.created_by)
        .bind(&new_share.token)
        .bind(new_share.expires_at)
        .bind(new_share.can_download)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Share"))?;
        Ok(record.to_domain())
    }

    async fn get_share_by_token(&self, token: &str) -> PortResult<Share> {
        let record = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE token = $1"
        ))
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Share link"))?;
        Ok(record.to_domain())
    }

    async fn record_share_view(&self, share_id: Uuid, viewed_at: DateTime<Utc>) -> PortResult<Share> {
        let record = sqlx::query_as::<_, ShareRecord>(&format!(
            "UPDATE shares SET view_count = view_count + 1, last_viewed_at = $2 \
             WHERE id = $1 RETURNING {SHARE_COLUMNS}"
        ))
        .bind(share_id)
        .bind(viewed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Share"))?;
        Ok(record.to_domain())
    }

    async fn record_webhook_failure(&self, failure: WebhookFailure) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO webhook_failures (provider, event_id, event_type, payload, error) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&failure.provider)
        .bind(&failure.event_id)
        .bind(&failure.event_type)
        .bind(&failure.payload)
        .bind(&failure.error)
        .execute(&self.pool)
        .await
        .map_err(db_error("Webhook failure"))?;
        Ok(())
    }
}
