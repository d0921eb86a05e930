//! services/api/src/web/share.rs
//!
//! Share link creation for owners and the public share view.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    Extension,
};
use bridge_core::sharing::{CreatedShare, SharedView};
use bridge_core::{PortError, Summary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    doc_id: Uuid,
    /// Hours until the link expires, 1 to 720. Defaults to 48.
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    can_download: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareResponse {
    id: Uuid,
    token: String,
    url: String,
    expires_at: DateTime<Utc>,
    can_download: bool,
    created_at: DateTime<Utc>,
}

impl From<CreatedShare> for CreateShareResponse {
    fn from(created: CreatedShare) -> Self {
        let CreatedShare { share, url } = created;
        Self {
            id: share.id,
            token: share.token,
            url,
            expires_at: share.expires_at,
            can_download: share.can_download,
            created_at: share.created_at,
        }
    }
}

/// The read-only view behind a share link.
#[derive(Serialize, ToSchema)]
pub struct SharedResultResponse {
    #[serde(rename = "documentId")]
    document_id: Uuid,
    filename: String,
    translation_html: String,
    #[schema(value_type = Object)]
    summary: Summary,
    detected_language: String,
    target_language: String,
    #[serde(rename = "expiresAt")]
    expires_at: DateTime<Utc>,
    #[serde(rename = "canDownload")]
    can_download: bool,
    /// Present only when the owner allowed downloads.
    #[serde(rename = "fileUrl", skip_serializing_if = "Option::is_none")]
    file_url: Option<String>,
}

impl From<SharedView> for SharedResultResponse {
    fn from(view: SharedView) -> Self {
        let SharedView {
            share,
            document,
            result,
        } = view;
        Self {
            document_id: document.id,
            filename: document.filename,
            translation_html: result.translation_html,
            summary: result.summary,
            detected_language: result.detected_language,
            target_language: result.target_language,
            expires_at: share.expires_at,
            can_download: share.can_download,
            file_url: share.can_download.then_some(document.blob_url),
        }
    }
}

/// Create a time-limited public link to a document's result.
#[utoipa::path(
    post,
    path = "/share",
    request_body = CreateShareRequest,
    responses(
        (status = 200, description = "Share link created", body = CreateShareResponse),
        (status = 400, description = "Invalid ttl"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such document")
    )
)]
pub async fn create_share_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    payload: Result<Json<CreateShareRequest>, JsonRejection>,
) -> Result<Json<CreateShareResponse>, ApiError> {
    let Json(request) = payload?;
    let created = state
        .results
        .create_share(
            request.doc_id,
            user_id,
            request.ttl,
            request.can_download,
            Utc::now(),
        )
        .await?;
    Ok(Json(created.into()))
}

/// Resolve a share link. Expired and unknown tokens are both 404.
#[utoipa::path(
    get,
    path = "/share/{token}",
    params(("token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "Shared result", body = SharedResultResponse),
        (status = 404, description = "Unknown or expired link")
    )
)]
pub async fn resolve_share_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SharedResultResponse>, ApiError> {
    let view = state
        .results
        .resolve_share(&token, Utc::now())
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => ApiError::NotFound("Share link not found or expired".to_string()),
            other => other.into(),
        })?;
    Ok(Json(view.into()))
}
