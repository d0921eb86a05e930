//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the document and translation endpoints and
//! the master definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::state::AppState;
use crate::web::{admin, checkout, share, webhooks};
use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use bridge_core::pipeline::{TranslateUpload, TranslationOutcome};
use bridge_core::sharing::ExportPayload;
use bridge_core::usage::PlanOverview;
use bridge_core::{
    Document, DocumentDomain, DocumentListing, DocumentResult, ExportFormat, SubscriptionStatus,
    Summary, UsageSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        upload_handler,
        translate_handler,
        list_documents_handler,
        usage_handler,
        get_document_handler,
        get_result_handler,
        export_handler,
        retranslate_handler,
        delete_document_handler,
        share::create_share_handler,
        share::resolve_share_handler,
        webhooks::stripe_webhook_handler,
        checkout::create_checkout_session_handler,
        admin::create_user_handler,
    ),
    components(
        schemas(
            HealthResponse, UploadResponse, TranslateRequest, TranslateResponse, UsageBody,
            DocumentsResponse, DocumentSummary, UsageResponse, DocumentResponse, ResultResponse,
            ExportRequest, RetranslateRequest, DeleteResponse,
            share::CreateShareRequest, share::CreateShareResponse, share::SharedResultResponse,
            webhooks::WebhookAck, checkout::CreateCheckoutRequest,
            checkout::CreateCheckoutResponse, admin::CreateUserRequest,
            admin::CreateUserResponse, admin::CreatedUser,
        )
    ),
    tags(
        (name = "Bridge API", description = "Document translation, summaries and sharing.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Where an accepted upload was stored.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    url: String,
    pathname: String,
    content_type: String,
    size: u64,
    uploaded_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    file_url: String,
    filename: String,
    mime_type: String,
    file_size: u64,
    #[serde(default)]
    target_lang: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "school")]
    domain: Option<DocumentDomain>,
}

#[derive(Serialize, ToSchema)]
pub struct UsageBody {
    count: u32,
    limit: u32,
    remaining: u32,
}

impl From<UsageSnapshot> for UsageBody {
    fn from(usage: UsageSnapshot) -> Self {
        Self {
            count: usage.count,
            limit: usage.limit,
            remaining: usage.remaining(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TranslateResponse {
    #[serde(rename = "documentId")]
    document_id: Uuid,
    #[serde(rename = "resultId")]
    result_id: Uuid,
    translation_html: String,
    #[schema(value_type = Object)]
    summary: Summary,
    detected_language: String,
    target_language: String,
    processing_time_ms: u64,
    confidence: u8,
    usage: UsageBody,
}

impl From<TranslationOutcome> for TranslateResponse {
    fn from(outcome: TranslationOutcome) -> Self {
        let TranslationOutcome {
            document,
            result,
            usage,
        } = outcome;
        Self {
            document_id: document.id,
            result_id: result.id,
            translation_html: result.translation_html,
            summary: result.summary,
            detected_language: result.detected_language,
            target_language: result.target_language,
            processing_time_ms: result.processing_time_ms,
            confidence: result.confidence,
            usage: usage.into(),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    id: Uuid,
    filename: String,
    mime_type: String,
    file_size: u64,
    uploaded_at: DateTime<Utc>,
    blob_url: String,
    detected_language: Option<String>,
    confidence: Option<u8>,
}

impl From<DocumentListing> for DocumentSummary {
    fn from(listing: DocumentListing) -> Self {
        let DocumentListing {
            document,
            detected_language,
            confidence,
        } = listing;
        Self {
            id: document.id,
            filename: document.filename,
            mime_type: document.mime_type,
            file_size: document.file_size,
            uploaded_at: document.uploaded_at,
            blob_url: document.blob_url,
            detected_language,
            confidence,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
    total: usize,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    usage: UsageBody,
    allowed: bool,
    #[schema(value_type = Object)]
    plan: PlanOverview,
    #[schema(value_type = Option<String>)]
    subscription_status: Option<SubscriptionStatus>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    id: Uuid,
    filename: String,
    blob_url: String,
    mime_type: String,
    file_size: u64,
    page_count: Option<u32>,
    uploaded_at: DateTime<Utc>,
    has_result: bool,
    result_id: Option<Uuid>,
}

impl DocumentResponse {
    fn new(document: Document, result: Option<&DocumentResult>) -> Self {
        Self {
            id: document.id,
            filename: document.filename,
            blob_url: document.blob_url,
            mime_type: document.mime_type,
            file_size: document.file_size,
            page_count: document.page_count,
            uploaded_at: document.uploaded_at,
            has_result: result.is_some(),
            result_id: result.map(|r| r.id),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ResultResponse {
    id: Uuid,
    #[serde(rename = "documentId")]
    document_id: Uuid,
    translation_html: String,
    #[schema(value_type = Object)]
    summary: Summary,
    detected_language: String,
    target_language: String,
    #[schema(value_type = Option<String>)]
    domain: Option<DocumentDomain>,
    confidence: u8,
    processing_time_ms: u64,
    created_at: DateTime<Utc>,
}

impl From<DocumentResult> for ResultResponse {
    fn from(result: DocumentResult) -> Self {
        Self {
            id: result.id,
            document_id: result.document_id,
            translation_html: result.translation_html,
            summary: result.summary,
            detected_language: result.detected_language,
            target_language: result.target_language,
            domain: result.domain,
            confidence: result.confidence,
            processing_time_ms: result.processing_time_ms,
            created_at: result.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ExportRequest {
    #[schema(value_type = String, example = "txt")]
    format: ExportFormat,
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetranslateRequest {
    #[serde(default)]
    target_lang: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    domain: Option<DocumentDomain>,
}

#[derive(Serialize, ToSchema)]
pub struct DeleteResponse {
    success: bool,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Upload a document for translation.
///
/// Accepts a multipart/form-data request with a `file` part. PDF, JPEG and
/// PNG files up to 10 MiB are accepted.
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content_type = "multipart/form-data", description = "The document to upload, in a `file` field."),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing file, unsupported type or file too large"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        let declared_size = data.len() as u64;

        let uploaded = state
            .ingestion
            .accept_upload(data, &filename, &content_type, declared_size)
            .await?;
        info!(%user_id, pathname = %uploaded.pathname, "Upload accepted");

        return Ok(Json(UploadResponse {
            url: uploaded.url,
            pathname: uploaded.pathname,
            content_type: uploaded.content_type,
            size: uploaded.size,
            uploaded_at: uploaded.uploaded_at,
        }));
    }
    Err(bridge_core::ingestion::IngestionError::MissingFile.into())
}

/// Translate and summarize an uploaded file.
///
/// Registers the document and runs the full pipeline. Consumes one
/// translation from the caller's quota on success.
#[utoipa::path(
    post,
    path = "/translate",
    request_body = TranslateRequest,
    responses(
        (status = 200, description = "Translation stored", body = TranslateResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not signed in"),
        (status = 402, description = "Subscription required"),
        (status = 403, description = "Translation limit exceeded"),
        (status = 422, description = "No text could be extracted"),
        (status = 502, description = "Extraction or generation failed")
    )
)]
pub async fn translate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let Json(request) = payload?;
    if request.file_url.trim().is_empty() || request.filename.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "fileUrl and filename are required".to_string(),
        ));
    }

    let outcome = state
        .pipeline
        .translate_upload(
            user_id,
            TranslateUpload {
                file_url: request.file_url,
                filename: request.filename,
                mime_type: request.mime_type,
                file_size: request.file_size,
                target_language: request.target_lang,
                domain: request.domain,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// List the caller's documents, newest first.
#[utoipa::path(
    get,
    path = "/documents",
    responses(
        (status = 200, description = "The caller's documents", body = DocumentsResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let documents: Vec<DocumentSummary> = state
        .ingestion
        .list_documents(user_id)
        .await?
        .into_iter()
        .map(DocumentSummary::from)
        .collect();
    Ok(Json(DocumentsResponse {
        total: documents.len(),
        documents,
    }))
}

/// The caller's quota, plan and plan features.
#[utoipa::path(
    get,
    path = "/usage",
    responses(
        (status = 200, description = "Usage overview", body = UsageResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn usage_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<UsageResponse>, ApiError> {
    let overview = state.ledger.overview(user_id).await?;
    Ok(Json(UsageResponse {
        usage: overview.quota.usage().into(),
        allowed: overview.quota.allowed,
        plan: overview.plan,
        subscription_status: overview.subscription_status,
    }))
}

/// Document metadata.
#[utoipa::path(
    get,
    path = "/doc/{id}",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document metadata", body = DocumentResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such document")
    )
)]
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let (document, result) = state.ingestion.get_document(document_id, user_id).await?;
    Ok(Json(DocumentResponse::new(document, result.as_ref())))
}

/// The translation and summary of a document.
#[utoipa::path(
    get,
    path = "/doc/{id}/result",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Translation result", body = ResultResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No document or no result yet")
    )
)]
pub async fn get_result_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<ResultResponse>, ApiError> {
    let result = state.results.get_result(document_id, user_id).await?;
    Ok(Json(result.into()))
}

/// Export a result as JSON or plain text.
#[utoipa::path(
    post,
    path = "/doc/{id}/export",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ExportRequest,
    responses(
        (status = 200, description = "JSON object or a text/plain attachment"),
        (status = 400, description = "Unknown format"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No result"),
        (status = 501, description = "PDF export is not available")
    )
)]
pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let export = state
        .results
        .export_result(document_id, user_id, request.format)
        .await?;

    let response = match export {
        ExportPayload::Json(body) => Json(body).into_response(),
        ExportPayload::Text { filename, body } => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            body,
        )
            .into_response(),
    };
    Ok(response)
}

/// Re-run translation for a document that has no result yet.
#[utoipa::path(
    post,
    path = "/doc/{id}/translate",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = RetranslateRequest,
    responses(
        (status = 200, description = "Translation stored", body = TranslateResponse),
        (status = 403, description = "Not the owner, or translation limit exceeded"),
        (status = 404, description = "No such document"),
        (status = 409, description = "The document already has a result")
    )
)]
pub async fn retranslate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
    payload: Result<Option<Json<RetranslateRequest>>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let request = payload?.map(|Json(r)| r).unwrap_or_default();
    let outcome = state
        .pipeline
        .retranslate(user_id, document_id, request.target_lang, request.domain)
        .await?;
    Ok(Json(outcome.into()))
}

/// Delete a document, its result and its stored file.
#[utoipa::path(
    delete,
    path = "/doc/{id}/delete",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Deleted", body = DeleteResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such document")
    )
)]
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    state.ingestion.delete_document(document_id, user_id).await?;
    info!(%document_id, %user_id, "Document deleted");
    Ok((StatusCode::OK, Json(DeleteResponse { success: true })))
}
