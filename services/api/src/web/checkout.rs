//! services/api/src/web/checkout.rs
//!
//! Starts a paid subscription from the marketing site. The account is created
//! by the billing webhook once the checkout completes.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    email: String,
    /// Defaults to the Starter plan's price.
    #[serde(default)]
    price_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    url: String,
    session_id: String,
}

/// Create a subscription checkout session with a 14-day trial.
#[utoipa::path(
    post,
    path = "/checkout/create-session",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CreateCheckoutResponse),
        (status = 400, description = "Missing or invalid email"),
        (status = 500, description = "The billing provider rejected the session"),
        (status = 503, description = "No checkout price configured")
    )
)]
pub async fn create_checkout_session_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let Json(request) = payload?;
    let session = state
        .checkout
        .start_checkout(&request.email, request.price_id.as_deref())
        .await?;
    Ok(Json(CreateCheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}
