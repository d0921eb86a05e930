//! services/api/src/web/router.rs
//!
//! Assembles the public and authenticated routes into one router.

use crate::config::ConfigError;
use crate::error::ApiError;
use crate::web::{
    admin, checkout, middleware::require_auth, rest, share, state::AppState, webhooks,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use bridge_core::ingestion::MAX_UPLOAD_BYTES;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Room for the multipart envelope around a maximum-size file, so oversize
/// files reach upload validation and get a descriptive 400.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    // Credentialed CORS cannot use a wildcard origin.
    if app_state.config.cors_origin == "*" {
        return Err(ConfigError::InvalidValue(
            "CORS_ORIGIN".to_string(),
            "a wildcard origin cannot be used with session cookies".to_string(),
        )
        .into());
    }
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth session required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/share/{token}", get(share::resolve_share_handler))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook_handler))
        .route(
            "/checkout/create-session",
            post(checkout::create_checkout_session_handler),
        )
        .route("/admin/users", post(admin::create_user_handler));

    // Protected routes (auth session required)
    let protected_routes = Router::new()
        .route("/upload", post(rest::upload_handler))
        .route("/translate", post(rest::translate_handler))
        .route("/documents", get(rest::list_documents_handler))
        .route("/usage", get(rest::usage_handler))
        .route("/doc/{id}", get(rest::get_document_handler))
        .route("/doc/{id}/result", get(rest::get_result_handler))
        .route("/doc/{id}/export", post(rest::export_handler))
        .route("/doc/{id}/translate", post(rest::retranslate_handler))
        .route("/doc/{id}/delete", delete(rest::delete_document_handler))
        .route("/share", post(share::create_share_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let body_limit = MAX_UPLOAD_BYTES as usize + MULTIPART_OVERHEAD_BYTES;
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", rest::ApiDoc::openapi())))
}
