//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bridge_core::billing::CheckoutError;
use bridge_core::ingestion::IngestionError;
use bridge_core::pipeline::{PipelineError, PipelineStage};
use bridge_core::ports::PortError;
use bridge_core::sharing::ResultStoreError;
use bridge_core::usage::{QuotaStatus, QUOTA_EXCEEDED_CODE, UPGRADE_URL};
use bridge_core::SubscriptionPlan;
use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;

pub const RESULT_ALREADY_EXISTS_CODE: &str = "RESULT_ALREADY_EXISTS";

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("Translation limit exceeded")]
    QuotaExceeded(QuotaStatus),

    #[error("An active subscription is required")]
    SubscriptionRequired,

    #[error("{0}")]
    Unprocessable(String),

    /// A pipeline stage failed; the stage travels with the message.
    #[error("{stage} failed: {message}")]
    Pipeline { stage: PipelineStage, message: String },

    #[error("{0}")]
    NotImplemented(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            code: "FORBIDDEN",
            message: message.into(),
        }
    }
}

//=========================================================================================
// Response Bodies
//=========================================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaBody {
    error: &'static str,
    message: String,
    code: &'static str,
    limit: u32,
    count: u32,
    plan: SubscriptionPlan,
    upgrade_url: &'static str,
}

fn body(status: StatusCode, error: &str, code: &'static str, message: Option<String>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        code,
        message,
        stage: None,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => {
                body(StatusCode::BAD_REQUEST, &detail, "BAD_REQUEST", None)
            }
            ApiError::Unauthorized => body(
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "UNAUTHORIZED",
                Some("You must be signed in to use this endpoint.".to_string()),
            ),
            ApiError::Forbidden { code, message } => {
                body(StatusCode::FORBIDDEN, "Forbidden", code, Some(message))
            }
            ApiError::NotFound(detail) => body(StatusCode::NOT_FOUND, &detail, "NOT_FOUND", None),
            ApiError::Conflict { code, message } => {
                body(StatusCode::CONFLICT, "Conflict", code, Some(message))
            }
            ApiError::QuotaExceeded(status) => {
                let body = QuotaBody {
                    error: "Translation limit exceeded",
                    message: status.message(),
                    code: QUOTA_EXCEEDED_CODE,
                    limit: status.limit,
                    count: status.count,
                    plan: status.plan,
                    upgrade_url: UPGRADE_URL,
                };
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
            ApiError::SubscriptionRequired => body(
                StatusCode::PAYMENT_REQUIRED,
                "Subscription required",
                "SUBSCRIPTION_REQUIRED",
                Some("An active subscription is required to translate documents.".to_string()),
            ),
            ApiError::Unprocessable(detail) => body(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Translation failed",
                "EMPTY_EXTRACTION",
                Some(detail),
            ),
            ApiError::Pipeline { stage, message } => {
                error!(%stage, "Pipeline error: {}", message);
                let status = match stage {
                    PipelineStage::Extracting
                    | PipelineStage::Generating
                    | PipelineStage::Validating => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let body = ErrorBody {
                    error: "Translation failed".to_string(),
                    code: "TRANSLATION_FAILED",
                    message: Some(message),
                    stage: Some(stage.as_str()),
                };
                (status, Json(body)).into_response()
            }
            ApiError::NotImplemented(detail) => {
                body(StatusCode::NOT_IMPLEMENTED, &detail, "NOT_IMPLEMENTED", None)
            }
            ApiError::ServiceUnavailable(detail) => body(
                StatusCode::SERVICE_UNAVAILABLE,
                &detail,
                "SERVICE_UNAVAILABLE",
                None,
            ),
            other => {
                error!("Internal error: {}", other);
                body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred",
                    "INTERNAL",
                    None,
                )
            }
        }
    }
}

//=========================================================================================
// Conversions from core errors
//=========================================================================================

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(_) => ApiError::NotFound("Not found".to_string()),
            PortError::Unauthorized => ApiError::Unauthorized,
            // The message names no resource details beyond existence.
            PortError::Forbidden(_) => {
                ApiError::forbidden("You do not have access to this resource.")
            }
            PortError::Conflict(message) => ApiError::Conflict {
                code: "CONFLICT",
                message,
            },
            PortError::QuotaExceeded => ApiError::Forbidden {
                code: QUOTA_EXCEEDED_CODE,
                message: "Translation limit reached.".to_string(),
            },
            PortError::Unexpected(message) => ApiError::Internal(message),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::QuotaExceeded(status) => ApiError::QuotaExceeded(status),
            PipelineError::SubscriptionRequired => ApiError::SubscriptionRequired,
            PipelineError::EmptyExtraction => ApiError::Unprocessable(err.to_string()),
            PipelineError::InvalidFile(source) => source.into(),
            PipelineError::AlreadyTranslated(_) => ApiError::Conflict {
                code: RESULT_ALREADY_EXISTS_CODE,
                message: err.to_string(),
            },
            PipelineError::InvalidResponse(_) => ApiError::Pipeline {
                stage: err.stage(),
                message: err.to_string(),
            },
            PipelineError::Stage { stage, source } => match source {
                PortError::Forbidden(_) | PortError::Unauthorized => source.into(),
                PortError::NotFound(_) if stage == PipelineStage::Registering => source.into(),
                other => ApiError::Pipeline {
                    stage,
                    message: other.to_string(),
                },
            },
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::MissingFile
            | IngestionError::UnsupportedType(_)
            | IngestionError::TooLarge { .. }
            | IngestionError::ForeignUrl => ApiError::BadRequest(err.to_string()),
            IngestionError::Storage(source) => {
                ApiError::Internal(format!("Failed to upload file: {source}"))
            }
        }
    }
}

impl From<ResultStoreError> for ApiError {
    fn from(err: ResultStoreError) -> Self {
        match err {
            ResultStoreError::InvalidTtl(_) => ApiError::BadRequest(err.to_string()),
            ResultStoreError::NotImplemented(_) => ApiError::NotImplemented(err.to_string()),
            ResultStoreError::Port(source) => source.into(),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::MissingEmail | CheckoutError::InvalidEmail => {
                ApiError::BadRequest(err.to_string())
            }
            CheckoutError::PriceNotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            CheckoutError::Provider(_) => ApiError::Internal(err.to_string()),
        }
    }
}

/// Malformed bodies, including unknown enum values such as an export
/// format, are client errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Failed to read multipart data: {}", err.body_text()))
    }
}
