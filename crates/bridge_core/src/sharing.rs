//! crates/bridge_core/src/sharing.rs
//!
//! Serves persisted results, renders exports, and manages share tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Document, DocumentResult, ExportFormat, NewShare, Share, Summary};
use crate::ingestion::owned_document;
use crate::ports::{DatabaseService, PortError, PortResult};

pub const DEFAULT_SHARE_TTL_HOURS: u32 = 48;
pub const MAX_SHARE_TTL_HOURS: u32 = 24 * 30;

/// Random bytes behind each share token (43 characters once encoded).
const SHARE_TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ResultStoreError {
    #[error("Share lifetime must be between 1 and {MAX_SHARE_TTL_HOURS} hours, got {0}")]
    InvalidTtl(u32),
    #[error("{0} export is not implemented")]
    NotImplemented(ExportFormat),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// A bearer credential: 256 bits from the OS RNG, URL-safe base64.
pub fn generate_share_token() -> String {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn share_url(app_url: &str, token: &str) -> String {
    format!("{}/share/{}", app_url.trim_end_matches('/'), token)
}

//=========================================================================================
// Export rendering
//=========================================================================================

/// The structured export: translation, summary and result metadata.
pub fn export_json(result: &DocumentResult) -> serde_json::Value {
    json!({
        "translation": result.translation_html,
        "summary": result.summary,
        "metadata": {
            "detected_language": result.detected_language,
            "target_language": result.target_language,
            "domain": result.domain,
            "confidence": result.confidence,
        },
    })
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?:<[^>]*>\s*)+").expect("tag pattern is valid"))
}

/// Strips markup, decodes the common entities and collapses blank runs.
///
/// A run of adjacent tags (`</h1><p>`) becomes one line break, so block
/// elements end up on consecutive lines.
pub fn strip_markup(html: &str) -> String {
    let replaced = tag_pattern().replace_all(html, "\n");
    let decoded = replaced
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut lines: Vec<&str> = Vec::new();
    for line in decoded.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn push_list_section(out: &mut String, title: &str, items: Option<&Vec<String>>) {
    if let Some(items) = items.filter(|items| !items.is_empty()) {
        out.push_str(&format!("\n\n{title}:\n"));
        out.push_str(&items.join("\n"));
    }
}

/// Flattened plain-text rendering of a result.
pub fn render_text(translation_html: &str, summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str("TRANSLATION\n===========\n");
    out.push_str(&strip_markup(translation_html));
    out.push_str("\n\nSUMMARY\n=======\n");
    out.push_str(&format!("Purpose: {}\n\nActions:\n", summary.purpose));
    let actions: Vec<String> = summary
        .actions
        .iter()
        .enumerate()
        .map(|(i, action)| format!("{}. {}", i + 1, action))
        .collect();
    out.push_str(&actions.join("\n"));
    push_list_section(&mut out, "Due Dates", summary.due_dates.as_ref());
    push_list_section(&mut out, "Costs", summary.costs.as_ref());
    out.trim().to_string()
}

#[derive(Debug, Clone)]
pub enum ExportPayload {
    Json(serde_json::Value),
    Text { filename: String, body: String },
}

//=========================================================================================
// Shares
//=========================================================================================

#[derive(Debug, Clone)]
pub struct CreatedShare {
    pub share: Share,
    pub url: String,
}

/// What a public share link resolves to.
#[derive(Debug, Clone)]
pub struct SharedView {
    pub share: Share,
    pub document: Document,
    pub result: DocumentResult,
}

#[derive(Clone)]
pub struct ResultStore {
    db: Arc<dyn DatabaseService>,
    app_url: String,
}

impl ResultStore {
    pub fn new(db: Arc<dyn DatabaseService>, app_url: impl Into<String>) -> Self {
        Self {
            db,
            app_url: app_url.into(),
        }
    }

    pub async fn get_result(&self, document_id: Uuid, requester: Uuid) -> PortResult<DocumentResult> {
        owned_document(self.db.as_ref(), document_id, requester).await?;
        self.db.get_result_by_document(document_id).await
    }

    pub async fn export_result(
        &self,
        document_id: Uuid,
        requester: Uuid,
        format: ExportFormat,
    ) -> Result<ExportPayload, ResultStoreError> {
        let result = self.get_result(document_id, requester).await?;
        match format {
            ExportFormat::Json => Ok(ExportPayload::Json(export_json(&result))),
            ExportFormat::Txt => Ok(ExportPayload::Text {
                filename: format!("translation-{document_id}.txt"),
                body: render_text(&result.translation_html, &result.summary),
            }),
            ExportFormat::Pdf => Err(ResultStoreError::NotImplemented(ExportFormat::Pdf)),
        }
    }

    pub async fn create_share(
        &self,
        document_id: Uuid,
        requester: Uuid,
        ttl_hours: Option<u32>,
        can_download: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<CreatedShare, ResultStoreError> {
        let ttl_hours = ttl_hours.unwrap_or(DEFAULT_SHARE_TTL_HOURS);
        if ttl_hours == 0 || ttl_hours > MAX_SHARE_TTL_HOURS {
            return Err(ResultStoreError::InvalidTtl(ttl_hours));
        }
        owned_document(self.db.as_ref(), document_id, requester).await?;

        let share = self
            .db
            .create_share(NewShare {
                document_id,
                created_by: requester,
                token: generate_share_token(),
                expires_at: now + Duration::hours(i64::from(ttl_hours)),
                can_download: can_download.unwrap_or(true),
            })
            .await?;
        info!(%document_id, share_id = %share.id, ttl_hours, "Share link created");

        let url = share_url(&self.app_url, &share.token);
        Ok(CreatedShare { share, url })
    }

    /// Resolves a token to its content. Expired and unknown tokens are both
    /// `NotFound`, and an expired token's view counter is left untouched.
    pub async fn resolve_share(&self, token: &str, now: DateTime<Utc>) -> PortResult<SharedView> {
        let share = self.db.get_share_by_token(token).await?;
        if share.is_expired(now) {
            return Err(PortError::NotFound("share link not found".to_string()));
        }

        let document = self.db.get_document(share.document_id).await?;
        let result = self.db.get_result_by_document(share.document_id).await?;
        let share = self.db.record_share_view(share.id, now).await?;

        Ok(SharedView {
            share,
            document,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubscriptionPlan;
    use crate::testing::{sample_result, sample_user, InMemoryDatabase};

    struct Fixture {
        store: ResultStore,
        db: Arc<InMemoryDatabase>,
        owner: Uuid,
        document: Document,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(InMemoryDatabase::new());
        let owner = db.insert_user(sample_user(SubscriptionPlan::Free));
        let document = db.insert_document(owner, "https://blob.test/a.pdf", "application/pdf");
        db.insert_result(sample_result(document.id));
        Fixture {
            store: ResultStore::new(db.clone(), "https://bridge.test/"),
            db,
            owner,
            document,
        }
    }

    #[test]
    fn share_tokens_are_long_url_safe_and_unique() {
        let a = generate_share_token();
        let b = generate_share_token();
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a, b);
    }

    #[test]
    fn text_render_strips_tags_and_labels_sections() {
        let summary = Summary {
            purpose: "Invitation to a parent meeting".into(),
            actions: vec!["Sign the form".into(), "Attend the meeting".into()],
            due_dates: Some(vec!["March 12".into()]),
            costs: None,
        };
        let text = render_text(
            "<h1>Meeting</h1><p>Tom &amp; Jerry's class</p><ul><li>Bring ID</li></ul>",
            &summary,
        );

        assert!(!text.contains('<'));
        assert!(text.starts_with("TRANSLATION\n===========\nMeeting\nTom & Jerry's class\nBring ID"));
        assert!(text.contains("SUMMARY\n=======\nPurpose: Invitation to a parent meeting"));
        assert!(text.contains("Actions:\n1. Sign the form\n2. Attend the meeting"));
        assert!(text.contains("Due Dates:\nMarch 12"));
        assert!(!text.contains("Costs:"));
    }

    #[test]
    fn adjacent_tags_become_a_single_line_break() {
        assert_eq!(
            strip_markup("<div><p>One</p>\n  <p>Two</p></div><br/><p>Three</p>"),
            "One\nTwo\nThree"
        );
        assert_eq!(strip_markup("<p>First\n\n\nSecond</p>"), "First\n\nSecond");
        assert_eq!(strip_markup("<b>a &lt;b&gt;</b>"), "a <b>");
    }

    #[tokio::test]
    async fn json_export_reparses_to_the_persisted_summary() {
        let f = fixture();
        let persisted = f.db.result_for(f.document.id).unwrap().summary;

        let payload = f
            .store
            .export_result(f.document.id, f.owner, ExportFormat::Json)
            .await
            .unwrap();
        let ExportPayload::Json(value) = payload else {
            panic!("expected json payload");
        };
        let text = serde_json::to_string(&value).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let summary: Summary = serde_json::from_value(reparsed["summary"].clone()).unwrap();

        assert_eq!(summary, persisted);
        assert_eq!(reparsed["metadata"]["target_language"], "en");
    }

    #[tokio::test]
    async fn txt_export_is_an_attachment_and_pdf_is_unimplemented() {
        let f = fixture();
        match f.store.export_result(f.document.id, f.owner, ExportFormat::Txt).await.unwrap() {
            ExportPayload::Text { filename, body } => {
                assert_eq!(filename, format!("translation-{}.txt", f.document.id));
                assert!(body.starts_with("TRANSLATION"));
            }
            other => panic!("expected text payload, got {other:?}"),
        }
        let err = f
            .store
            .export_result(f.document.id, f.owner, ExportFormat::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, ResultStoreError::NotImplemented(ExportFormat::Pdf)));
    }

    #[tokio::test]
    async fn results_are_owner_only() {
        let f = fixture();
        let stranger = f.db.insert_user(sample_user(SubscriptionPlan::Free));
        let err = f.store.get_result(f.document.id, stranger).await.unwrap_err();
        assert!(matches!(err, PortError::Forbidden(_)));
    }

    #[tokio::test]
    async fn share_defaults_to_two_days_with_download() {
        let f = fixture();
        let now = Utc::now();
        let created = f
            .store
            .create_share(f.document.id, f.owner, None, None, now)
            .await
            .unwrap();

        assert_eq!(created.share.expires_at, now + Duration::hours(48));
        assert!(created.share.can_download);
        assert_eq!(created.share.view_count, 0);
        assert_eq!(created.url, format!("https://bridge.test/share/{}", created.share.token));
    }

    #[tokio::test]
    async fn share_creation_checks_owner_and_ttl() {
        let f = fixture();
        let stranger = f.db.insert_user(sample_user(SubscriptionPlan::Free));
        let now = Utc::now();

        let err = f
            .store
            .create_share(f.document.id, stranger, Some(1), None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ResultStoreError::Port(PortError::Forbidden(_))));

        let err = f
            .store
            .create_share(f.document.id, f.owner, Some(0), None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ResultStoreError::InvalidTtl(0)));
        assert_eq!(f.db.share_count(), 0);
    }

    #[tokio::test]
    async fn resolving_counts_views() {
        let f = fixture();
        let now = Utc::now();
        let created = f
            .store
            .create_share(f.document.id, f.owner, Some(1), Some(false), now)
            .await
            .unwrap();

        let later = now + Duration::minutes(5);
        let view = f.store.resolve_share(&created.share.token, later).await.unwrap();
        assert_eq!(view.share.view_count, 1);
        assert_eq!(view.share.last_viewed_at, Some(later));
        assert!(!view.share.can_download);
        assert_eq!(view.result.document_id, f.document.id);

        let view = f.store.resolve_share(&created.share.token, later).await.unwrap();
        assert_eq!(view.share.view_count, 2);
    }

    #[tokio::test]
    async fn expired_share_is_not_found_and_not_counted() {
        let f = fixture();
        let now = Utc::now();
        for can_download in [true, false] {
            let created = f
                .store
                .create_share(f.document.id, f.owner, Some(1), Some(can_download), now)
                .await
                .unwrap();

            let after_expiry = now + Duration::hours(1) + Duration::seconds(1);
            let err = f
                .store
                .resolve_share(&created.share.token, after_expiry)
                .await
                .unwrap_err();
            assert!(matches!(err, PortError::NotFound(_)));

            let stored = f.db.share_by_token(&created.share.token).unwrap();
            assert_eq!(stored.view_count, 0);
            assert_eq!(stored.last_viewed_at, None);
        }
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let f = fixture();
        let err = f.store.resolve_share("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
