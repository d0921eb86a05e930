//! crates/bridge_core/src/pipeline.rs
//!
//! The translation pipeline: quota check, text extraction, structured
//! generation, response validation, confidence scoring and persistence.
//!
//! The pipeline is synchronous per request. Nothing is written between the
//! document row and the final result transaction, so a failure at any stage
//! leaves no partial result and consumes no quota.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{Document, DocumentDomain, DocumentResult, NewDocument, NewResult, Summary, UsageSnapshot, User};
use crate::ports::{
    BlobStorage, DatabaseService, GenerationInput, GenerationRequest, PortError, RawTranslation,
    TextExtractor, TranslationService,
};
use crate::ingestion::{owned_document, validate_file_reference, IngestionError};
use crate::usage::{quota_status, QuotaStatus};

pub const DEFAULT_TARGET_LANGUAGE: &str = "en";

/// Extracted text shorter than this (ignoring whitespace) means the PDF has no
/// usable text layer.
pub const MIN_EXTRACTED_CHARS: usize = 10;

/// Where in the pipeline a request was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    QuotaCheck,
    Registering,
    Extracting,
    Generating,
    Validating,
    Persisting,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaCheck => "quota_check",
            Self::Registering => "registering",
            Self::Extracting => "extracting",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Persisting => "persisting",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Translation limit of {} reached", .0.limit)]
    QuotaExceeded(QuotaStatus),
    #[error("An active subscription is required to translate documents")]
    SubscriptionRequired,
    #[error("Could not extract text from PDF - document may be image-based")]
    EmptyExtraction,
    #[error("Invalid response structure from translation service: missing {0}")]
    InvalidResponse(&'static str),
    #[error(transparent)]
    InvalidFile(#[from] IngestionError),
    #[error("Document {0} has already been translated")]
    AlreadyTranslated(Uuid),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: PortError,
    },
}

impl PipelineError {
    fn at(stage: PipelineStage) -> impl FnOnce(PortError) -> PipelineError {
        move |source| PipelineError::Stage { stage, source }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::QuotaExceeded(_) | Self::SubscriptionRequired => PipelineStage::QuotaCheck,
            Self::InvalidFile(_) => PipelineStage::Registering,
            Self::EmptyExtraction => PipelineStage::Extracting,
            Self::InvalidResponse(_) => PipelineStage::Validating,
            Self::AlreadyTranslated(_) => PipelineStage::Persisting,
            Self::Stage { stage, .. } => *stage,
        }
    }
}

/// A generation response that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTranslation {
    pub translation_html: String,
    pub summary: Summary,
    pub detected_language: String,
}

/// Rejects a response missing any required field. Blank strings count as missing.
pub fn validate_response(raw: RawTranslation) -> Result<GeneratedTranslation, PipelineError> {
    let translation_html = raw
        .translation_html
        .filter(|s| !s.trim().is_empty())
        .ok_or(PipelineError::InvalidResponse("translation_html"))?;
    let summary = raw.summary.ok_or(PipelineError::InvalidResponse("summary"))?;
    let detected_language = raw
        .detected_language
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(PipelineError::InvalidResponse("detected_language"))?;

    Ok(GeneratedTranslation {
        translation_html,
        summary,
        detected_language,
    })
}

/// Scores the *shape* of a summary, not the quality of the translation.
///
/// Base 70; +10 for actions, +10 for due dates, +5 for costs, +5 for a purpose
/// longer than 20 characters; never above 100.
pub fn calculate_confidence(summary: &Summary) -> u8 {
    let has = |list: &Option<Vec<String>>| list.as_ref().is_some_and(|l| !l.is_empty());

    let mut confidence: u8 = 70;
    if !summary.actions.is_empty() {
        confidence += 10;
    }
    if has(&summary.due_dates) {
        confidence += 10;
    }
    if has(&summary.costs) {
        confidence += 5;
    }
    if summary.purpose.chars().count() > 20 {
        confidence += 5;
    }
    confidence.min(100)
}

/// Joins page texts with a blank line, failing when nothing readable remains.
pub fn join_pages(pages: Vec<String>) -> Result<String, PipelineError> {
    let text = pages.join("\n\n");
    let readable = text.chars().filter(|c| !c.is_whitespace()).count();
    if readable < MIN_EXTRACTED_CHARS {
        return Err(PipelineError::EmptyExtraction);
    }
    Ok(text)
}

/// A request to translate a freshly uploaded file.
#[derive(Debug, Clone)]
pub struct TranslateUpload {
    pub file_url: String,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub target_language: Option<String>,
    pub domain: Option<DocumentDomain>,
}

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub document: Document,
    pub result: DocumentResult,
    pub usage: UsageSnapshot,
}

//=========================================================================================
// The Pipeline
//=========================================================================================

#[derive(Clone)]
pub struct TranslationPipeline {
    db: Arc<dyn DatabaseService>,
    blob: Arc<dyn BlobStorage>,
    extractor: Arc<dyn TextExtractor>,
    translator: Arc<dyn TranslationService>,
}

impl TranslationPipeline {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        blob: Arc<dyn BlobStorage>,
        extractor: Arc<dyn TextExtractor>,
        translator: Arc<dyn TranslationService>,
    ) -> Self {
        Self {
            db,
            blob,
            extractor,
            translator,
        }
    }

    /// Validates the file reference, checks quota, registers the document,
    /// then translates it.
    ///
    /// Validation and the quota check both happen before the document row
    /// exists, so a rejection leaves nothing behind.
    pub async fn translate_upload(
        &self,
        user_id: Uuid,
        request: TranslateUpload,
    ) -> Result<TranslationOutcome, PipelineError> {
        let started = Instant::now();
        validate_file_reference(
            self.blob.as_ref(),
            &request.file_url,
            &request.mime_type,
            request.file_size,
        )?;
        let user = self.admit(user_id).await?;

        let document = self
            .db
            .create_document(NewDocument {
                owner_id: user.id,
                blob_url: request.file_url,
                filename: request.filename,
                mime_type: request.mime_type,
                file_size: request.file_size,
            })
            .await
            .map_err(PipelineError::at(PipelineStage::Registering))?;
        info!(document_id = %document.id, %user_id, "Document record created");

        let target = request
            .target_language
            .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
        self.run(&user, document, target, request.domain, started).await
    }

    /// Re-runs the pipeline for an existing document that has no result yet,
    /// e.g. after a transient generation failure.
    pub async fn retranslate(
        &self,
        user_id: Uuid,
        document_id: Uuid,
        target_language: Option<String>,
        domain: Option<DocumentDomain>,
    ) -> Result<TranslationOutcome, PipelineError> {
        let started = Instant::now();
        let document = owned_document(self.db.as_ref(), document_id, user_id)
            .await
            .map_err(PipelineError::at(PipelineStage::Registering))?;
        match self.db.get_result_by_document(document_id).await {
            Ok(_) => return Err(PipelineError::AlreadyTranslated(document_id)),
            Err(PortError::NotFound(_)) => {}
            Err(e) => return Err(PipelineError::at(PipelineStage::Registering)(e)),
        }

        let user = self.admit(user_id).await?;
        let target = target_language.unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
        self.run(&user, document, target, domain, started).await
    }

    /// Loads the user and applies the subscription gate and the quota check.
    async fn admit(&self, user_id: Uuid) -> Result<User, PipelineError> {
        let user = self
            .db
            .get_user(user_id)
            .await
            .map_err(PipelineError::at(PipelineStage::QuotaCheck))?;

        if !user.has_translation_access(Utc::now()) {
            return Err(PipelineError::SubscriptionRequired);
        }
        let status = quota_status(&user);
        if !status.allowed {
            info!(%user_id, count = status.count, limit = status.limit, "Translation limit reached");
            return Err(PipelineError::QuotaExceeded(status));
        }
        Ok(user)
    }

    async fn run(
        &self,
        user: &User,
        document: Document,
        target_language: String,
        domain: Option<DocumentDomain>,
        started: Instant,
    ) -> Result<TranslationOutcome, PipelineError> {
        let document_id = document.id;
        let outcome = self.execute(user, document, target_language, domain, started).await;
        if let Err(e) = &outcome {
            error!(%document_id, stage = %e.stage(), error = %e, "Translation failed");
        }
        outcome
    }

    async fn execute(
        &self,
        user: &User,
        document: Document,
        target_language: String,
        domain: Option<DocumentDomain>,
        started: Instant,
    ) -> Result<TranslationOutcome, PipelineError> {
        let input = self.extract_text(&document).await?;

        let request = GenerationRequest {
            input,
            target_language: target_language.clone(),
            domain,
        };
        let raw = self
            .translator
            .generate(&request)
            .await
            .map_err(PipelineError::at(PipelineStage::Generating))?;

        let generated = validate_response(raw)?;
        let confidence = calculate_confidence(&generated.summary);

        let new_result = NewResult {
            document_id: document.id,
            user_id: user.id,
            translation_html: generated.translation_html,
            summary: generated.summary,
            detected_language: generated.detected_language,
            target_language,
            domain,
            confidence,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        let (result, usage) = self
            .db
            .save_result_with_usage(new_result)
            .await
            .map_err(|e| match e {
                PortError::QuotaExceeded => {
                    let mut status = quota_status(user);
                    status.allowed = false;
                    status.count = status.count.max(status.limit);
                    PipelineError::QuotaExceeded(status)
                }
                PortError::Conflict(_) => PipelineError::AlreadyTranslated(document.id),
                other => PipelineError::at(PipelineStage::Persisting)(other),
            })?;

        info!(
            document_id = %document.id,
            confidence = result.confidence,
            processing_time_ms = result.processing_time_ms,
            usage_count = usage.count,
            usage_limit = usage.limit,
            "Translation completed"
        );

        Ok(TranslationOutcome {
            document,
            result,
            usage,
        })
    }

    /// PDFs are fetched and extracted page by page; images are handed to the
    /// generation service by URL.
    pub async fn extract_text(&self, document: &Document) -> Result<GenerationInput, PipelineError> {
        if !document.is_pdf() {
            return Ok(GenerationInput::ImageUrl(document.blob_url.clone()));
        }

        let bytes = self
            .blob
            .fetch(&document.blob_url)
            .await
            .map_err(PipelineError::at(PipelineStage::Extracting))?;

        let extractor = self.extractor.clone();
        let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
            .await
            .map_err(|e| PipelineError::Stage {
                stage: PipelineStage::Extracting,
                source: PortError::Unexpected(format!("extraction task failed: {e}")),
            })?
            .map_err(PipelineError::at(PipelineStage::Extracting))?;

        let page_count = pages.len();
        let text = join_pages(pages)?;
        info!(document_id = %document.id, page_count, chars = text.len(), "Extracted PDF text");
        Ok(GenerationInput::Text(text))
    }
}
