//! services/api/src/adapters/stripe.rs
//!
//! Verifies Stripe webhook signatures and decodes event payloads into
//! `BillingEvent`s. No outbound calls are made to Stripe.

use bridge_core::billing::{BillingEvent, SubscriptionChange, WebhookDelivery};
use bridge_core::SubscriptionStatus;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Deliveries signed further than this from the current time are rejected.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookSignatureError {
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp is outside the tolerance window")]
    Expired,
    #[error("no signature matches the payload")]
    Mismatch,
    #[error("payload is not a webhook event: {0}")]
    MalformedPayload(String),
}

//=========================================================================================
// Signature Verification
//=========================================================================================

fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a `stripe-signature` header value for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> String {
    format!("t={timestamp},v1={}", compute_signature(secret, timestamp, payload))
}

/// Checks `header` against the raw request body.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &str,
    now: DateTime<Utc>,
) -> Result<(), WebhookSignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookSignatureError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookSignatureError::MalformedHeader);
    }
    if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookSignatureError::Expired);
    }

    let expected = compute_signature(secret, timestamp, payload);
    let matched = candidates
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(WebhookSignatureError::Mismatch)
    }
}

//=========================================================================================
// Event Decoding
//=========================================================================================

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct CheckoutSession {
    customer: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    subscription: Option<String>,
}

#[derive(Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Deserialize)]
struct Subscription {
    id: String,
    customer: String,
    status: String,
    items: Option<SubscriptionItems>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_end: Option<i64>,
}

#[derive(Deserialize)]
struct SubscriptionItems {
    data: Vec<SubscriptionItem>,
}

#[derive(Deserialize)]
struct SubscriptionItem {
    price: Option<Price>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Deserialize)]
struct Price {
    id: String,
}

#[derive(Deserialize)]
struct CustomerRef {
    customer: Option<String>,
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn decode<T: for<'de> Deserialize<'de>>(object: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(object).map_err(|e| e.to_string())
}

fn customer_of(object: serde_json::Value) -> Result<String, String> {
    decode::<CustomerRef>(object)?
        .customer
        .ok_or_else(|| "event carries no customer".to_string())
}

fn decode_event(event_type: &str, object: serde_json::Value) -> Result<BillingEvent, String> {
    match event_type {
        "checkout.session.completed" => {
            let session: CheckoutSession = decode(object)?;
            let customer_id = session
                .customer
                .ok_or_else(|| "checkout session carries no customer".to_string())?;
            let email = session
                .customer_details
                .and_then(|details| details.email)
                .or(session.customer_email);
            Ok(BillingEvent::CheckoutCompleted {
                email,
                customer_id,
                subscription_id: session.subscription,
            })
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let subscription: Subscription = decode(object)?;
            let status = subscription
                .status
                .parse::<SubscriptionStatus>()
                .map_err(|e| e.to_string())?;
            let item = subscription
                .items
                .and_then(|items| items.data.into_iter().next());
            let (price_id, item_start, item_end) = match item {
                Some(item) => (
                    item.price.map(|price| price.id),
                    item.current_period_start,
                    item.current_period_end,
                ),
                None => (None, None, None),
            };
            Ok(BillingEvent::SubscriptionChanged(SubscriptionChange {
                customer_id: subscription.customer,
                subscription_id: subscription.id,
                status,
                price_id,
                period_start: timestamp(subscription.current_period_start.or(item_start)),
                period_end: timestamp(subscription.current_period_end.or(item_end)),
                trial_end: timestamp(subscription.trial_end),
            }))
        }
        "customer.subscription.deleted" => Ok(BillingEvent::SubscriptionDeleted {
            customer_id: customer_of(object)?,
        }),
        "invoice.payment_failed" => Ok(BillingEvent::PaymentFailed {
            customer_id: customer_of(object)?,
        }),
        _ => Ok(BillingEvent::Other),
    }
}

/// Decodes a verified payload. Only a payload that is not an event envelope
/// at all is an error; a known event with an unexpected shape is carried in
/// `WebhookDelivery::event` so it can be acknowledged and dead-lettered.
pub fn parse_delivery(payload: &str) -> Result<WebhookDelivery, WebhookSignatureError> {
    let envelope: Envelope = serde_json::from_str(payload)
        .map_err(|e| WebhookSignatureError::MalformedPayload(e.to_string()))?;
    let event = decode_event(&envelope.event_type, envelope.data.object);
    Ok(WebhookDelivery {
        event_id: envelope.id,
        event_type: envelope.event_type,
        payload: payload.to_string(),
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let body = r#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, now().timestamp() - 10, body);
        assert_eq!(verify_signature(SECRET, &header, body, now()), Ok(()));
    }

    #[test]
    fn rejects_tampered_bodies_and_wrong_secrets() {
        let body = r#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, now().timestamp(), body);
        assert_eq!(
            verify_signature(SECRET, &header, r#"{"id":"evt_2"}"#, now()),
            Err(WebhookSignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("whsec_other", &header, body, now()),
            Err(WebhookSignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_and_malformed_headers() {
        let body = "{}";
        let stale = signature_header(SECRET, now().timestamp() - 301, body);
        assert_eq!(
            verify_signature(SECRET, &stale, body, now()),
            Err(WebhookSignatureError::Expired)
        );
        assert_eq!(
            verify_signature(SECRET, "v1=abc", body, now()),
            Err(WebhookSignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(SECRET, "t=1700000000", body, now()),
            Err(WebhookSignatureError::MalformedHeader)
        );
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let body = "{}";
        let t = now().timestamp();
        let good = compute_signature(SECRET, t, body);
        let header = format!("t={t},v1=deadbeef,v1={good},v0=ignored");
        assert_eq!(verify_signature(SECRET, &header, body, now()), Ok(()));
    }

    #[test]
    fn decodes_checkout_with_customer_details_email() {
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_1",
                "customer_email": null,
                "customer_details": { "email": "parent@example.com" },
                "subscription": "sub_1"
            }}
        })
        .to_string();

        let delivery = parse_delivery(&payload).unwrap();
        assert_eq!(delivery.event_id, "evt_1");
        assert_eq!(
            delivery.event,
            Ok(BillingEvent::CheckoutCompleted {
                email: Some("parent@example.com".to_string()),
                customer_id: "cus_1".to_string(),
                subscription_id: Some("sub_1".to_string()),
            })
        );
    }

    #[test]
    fn decodes_subscription_updates_with_price_and_period() {
        let payload = json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "trialing",
                "items": { "data": [{
                    "price": { "id": "price_pro" },
                    "current_period_start": 1_700_000_000,
                    "current_period_end": 1_702_592_000
                }]},
                "trial_end": 1_701_000_000
            }}
        })
        .to_string();

        let Ok(BillingEvent::SubscriptionChanged(change)) = parse_delivery(&payload).unwrap().event
        else {
            panic!("expected a subscription change");
        };
        assert_eq!(change.status, SubscriptionStatus::Trialing);
        assert_eq!(change.price_id.as_deref(), Some("price_pro"));
        assert_eq!(change.period_start, Some(now()));
        assert_eq!(change.trial_end.map(|t| t.timestamp()), Some(1_701_000_000));
    }

    #[test]
    fn unknown_types_are_other_and_bad_shapes_are_carried() {
        let other = json!({ "id": "evt_3", "type": "charge.refunded", "data": { "object": {} } });
        assert_eq!(
            parse_delivery(&other.to_string()).unwrap().event,
            Ok(BillingEvent::Other)
        );

        let bad = json!({
            "id": "evt_4",
            "type": "customer.subscription.updated",
            "data": { "object": { "id": "sub_1", "customer": "cus_1", "status": "mystery" } }
        });
        assert!(parse_delivery(&bad.to_string()).unwrap().event.is_err());

        assert!(matches!(
            parse_delivery("not json"),
            Err(WebhookSignatureError::MalformedPayload(_))
        ));
    }
}
