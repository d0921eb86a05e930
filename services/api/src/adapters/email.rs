//! services/api/src/adapters/email.rs
//!
//! Implements the `EmailService` port with the Resend HTTP API.

use async_trait::async_trait;
use bridge_core::domain::EmailMessage;
use bridge_core::ports::{EmailService, PortError, PortResult};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

pub const RESEND_API_URL: &str = "https://api.resend.com";

#[derive(Clone)]
pub struct ResendEmailAdapter {
    http: Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl ResendEmailAdapter {
    pub fn new(http: Client, api_url: String, api_key: String, from: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailService for ResendEmailAdapter {
    async fn send(&self, message: &EmailMessage) -> PortResult<()> {
        let request = SendRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        };
        let response = self
            .http
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Email request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Email provider returned {status}: {detail}"
            )));
        }

        info!(subject = %message.subject, "Sent email");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: "parent@example.com".to_string(),
            subject: "Welcome to Bridge".to_string(),
            html: "<p>Hello</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_a_single_recipient_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_json(json!({
                "from": "Bridge <noreply@bridge.app>",
                "to": ["parent@example.com"],
                "subject": "Welcome to Bridge",
                "html": "<p>Hello</p>"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "email_1" })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = ResendEmailAdapter::new(
            Client::new(),
            server.uri(),
            "re_test".to_string(),
            "Bridge <noreply@bridge.app>".to_string(),
        );
        adapter.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn provider_rejections_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let adapter = ResendEmailAdapter::new(
            Client::new(),
            server.uri(),
            "re_test".to_string(),
            "nobody".to_string(),
        );
        let err = adapter.send(&message()).await.unwrap_err();
        assert!(matches!(err, PortError::Unexpected(msg) if msg.contains("422")));
    }
}
