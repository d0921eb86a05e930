//! services/api/src/web/webhooks.rs
//!
//! The billing provider's webhook endpoint.

use crate::adapters::stripe::{parse_delivery, verify_signature, SIGNATURE_HEADER};
use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{extract::State, http::HeaderMap, response::Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    received: bool,
}

/// Receive a signed Stripe event.
///
/// The signature is checked against the raw body before anything is
/// processed. Verified events are always acknowledged, even when applying
/// them fails; such failures are recorded for later inspection.
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    request_body(content_type = "application/json", description = "The raw Stripe event."),
    params(("stripe-signature" = String, Header, description = "Stripe signature header")),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn stripe_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            ApiError::ServiceUnavailable("Billing webhooks are not configured".to_string())
        })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing stripe-signature header".to_string()))?;

    if let Err(e) = verify_signature(secret, signature, &body, Utc::now()) {
        warn!("Rejected webhook: {}", e);
        return Err(ApiError::BadRequest(format!("Invalid signature: {e}")));
    }

    let delivery = parse_delivery(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    info!(event_id = %delivery.event_id, event_type = %delivery.event_type, "Webhook received");
    state.billing.handle(delivery).await;

    Ok(Json(WebhookAck { received: true }))
}
