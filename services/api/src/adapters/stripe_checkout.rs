//! services/api/src/adapters/stripe_checkout.rs
//!
//! Implements the `CheckoutProvider` port with Stripe's Checkout Sessions API.

use async_trait::async_trait;
use bridge_core::ports::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, PortError, PortResult,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

pub const STRIPE_API_URL: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeCheckoutAdapter {
    http: Client,
    api_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl StripeCheckoutAdapter {
    pub fn new(http: Client, api_url: String, secret_key: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            secret_key,
        }
    }
}

/// Stripe takes nested parameters as bracketed form keys.
fn session_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    vec![
        ("mode", "subscription".to_string()),
        ("customer_email", request.customer_email.clone()),
        ("payment_method_types[0]", "card".to_string()),
        ("line_items[0][price]", request.price_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "subscription_data[trial_period_days]",
            request.trial_period_days.to_string(),
        ),
        ("subscription_data[metadata][email]", request.customer_email.clone()),
        ("metadata[email]", request.customer_email.clone()),
        ("allow_promotion_codes", "true".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
    ]
}

#[async_trait]
impl CheckoutProvider for StripeCheckoutAdapter {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PortResult<CheckoutSession> {
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_url))
            .bearer_auth(&self.secret_key)
            .form(&session_form(request))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Checkout request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!(%status, "Stripe rejected the checkout session: {}", detail);
            return Err(PortError::Unexpected(format!(
                "Stripe returned {status}: {detail}"
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed checkout session: {e}")))?;
        let url = session.url.ok_or_else(|| {
            PortError::Unexpected(format!("Checkout session {} has no URL", session.id))
        })?;
        Ok(CheckoutSession { id: session.id, url })
    }
}
