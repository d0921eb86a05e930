//! services/api/src/adapters/blob.rs
//!
//! Implements the `BlobStorage` port against the Vercel Blob HTTP API.

use async_trait::async_trait;
use bridge_core::ingestion::MAX_UPLOAD_BYTES;
use bridge_core::ports::{BlobStorage, PortError, PortResult, StoredBlob};
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const API_VERSION: &str = "7";

/// An adapter that stores uploads in Vercel Blob with public access.
///
/// Stored files are served from subdomains of `public_host`; nothing outside
/// that host is ever downloaded.
#[derive(Clone)]
pub struct VercelBlobAdapter {
    http: Client,
    api_url: String,
    token: String,
    public_host: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutResponse {
    url: String,
    pathname: String,
    content_type: Option<String>,
}

fn transport(e: reqwest::Error) -> PortError {
    PortError::Unexpected(format!("Blob storage request failed: {e}"))
}

async fn status_error(response: reqwest::Response, what: &str) -> PortError {
    let status = response.status();
    let detail = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return PortError::NotFound(format!("{what}: blob not found"));
    }
    PortError::Unexpected(format!("{what} returned {status}: {detail}"))
}

fn too_large(size: u64) -> PortError {
    PortError::Unexpected(format!(
        "Blob of {size} bytes exceeds the {MAX_UPLOAD_BYTES} byte limit"
    ))
}

impl VercelBlobAdapter {
    pub fn new(http: Client, api_url: String, token: String, public_host: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            public_host: public_host.trim_matches('.').to_ascii_lowercase(),
        }
    }
}

#[async_trait]
impl BlobStorage for VercelBlobAdapter {
    async fn put(&self, pathname: &str, data: Bytes, content_type: &str) -> PortResult<StoredBlob> {
        let size = data.len();
        let response = self
            .http
            .put(format!("{}/{}", self.api_url, pathname.trim_start_matches('/')))
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .header("x-content-type", content_type)
            .header("x-add-random-suffix", "0")
            .body(data)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(status_error(response, "Blob upload").await);
        }

        let stored: PutResponse = response.json().await.map_err(transport)?;
        info!(pathname = %stored.pathname, size, "Stored blob");
        Ok(StoredBlob {
            url: stored.url,
            pathname: stored.pathname,
            content_type: stored
                .content_type
                .unwrap_or_else(|| content_type.to_string()),
        })
    }

    /// Downloads at most `MAX_UPLOAD_BYTES`, refusing anything larger.
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        if !self.holds_url(url) {
            warn!(%url, "Refused to fetch a URL outside blob storage");
            return Err(PortError::Forbidden(
                "file URL does not point into blob storage".to_string(),
            ));
        }

        let mut response = self.http.get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response, "Blob download").await);
        }
        if let Some(length) = response.content_length() {
            if length > MAX_UPLOAD_BYTES {
                return Err(too_large(length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            let received = (body.len() + chunk.len()) as u64;
            if received > MAX_UPLOAD_BYTES {
                return Err(too_large(received));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }

    async fn delete(&self, url: &str) -> PortResult<()> {
        let response = self
            .http
            .post(format!("{}/delete", self.api_url))
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .json(&json!({ "urls": [url] }))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            let err = status_error(response, "Blob delete").await;
            warn!(%url, "Failed to delete blob: {}", err);
            return Err(err);
        }
        Ok(())
    }

    fn holds_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "https" | "http") {
            return false;
        }
        parsed.host_str().is_some_and(|host| {
            host == self.public_host
                || host
                    .strip_suffix(self.public_host.as_str())
                    .is_some_and(|subdomain| subdomain.ends_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> VercelBlobAdapter {
        VercelBlobAdapter::new(
            Client::new(),
            server.uri(),
            "blob-token".to_string(),
            "127.0.0.1".to_string(),
        )
    }

    #[tokio::test]
    async fn put_sends_the_bytes_under_the_given_pathname() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads/u1/notice.pdf"))
            .and(header("authorization", "Bearer blob-token"))
            .and(header("x-content-type", "application/pdf"))
            .and(header("x-add-random-suffix", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://store.public.blob.vercel-storage.com/uploads/u1/notice.pdf",
                "pathname": "uploads/u1/notice.pdf",
                "contentType": "application/pdf"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stored = adapter(&server)
            .put("uploads/u1/notice.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();

        assert_eq!(stored.pathname, "uploads/u1/notice.pdf");
        assert!(stored.url.ends_with("/uploads/u1/notice.pdf"));
        assert_eq!(stored.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn put_failures_are_unexpected_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .put("a.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unexpected(msg) if msg.contains("403")));
    }

    #[tokio::test]
    async fn fetch_maps_missing_blobs_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/present.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let blob = adapter(&server);
        let bytes = blob.fetch(&format!("{}/present.pdf", server.uri())).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4");

        let err = blob.fetch(&format!("{}/gone.pdf", server.uri())).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn fetch_refuses_urls_outside_the_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"secret".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let blob = adapter(&server);
        for url in [
            "http://169.254.169.254/latest/meta-data/",
            "https://127.0.0.1.evil.example/a.pdf",
            "file:///etc/passwd",
            "not a url",
        ] {
            let err = blob.fetch(url).await.unwrap_err();
            assert!(matches!(err, PortError::Forbidden(_)), "{url}");
        }
    }

    #[test]
    fn holds_urls_on_the_public_host_and_its_subdomains() {
        let blob = VercelBlobAdapter::new(
            Client::new(),
            "https://blob.vercel-storage.com".to_string(),
            "blob-token".to_string(),
            "public.blob.vercel-storage.com".to_string(),
        );
        assert!(blob.holds_url("https://abc123.public.blob.vercel-storage.com/notice.pdf"));
        assert!(!blob.holds_url("https://evilpublic.blob.vercel-storage.com/notice.pdf"));
        assert!(!blob.holds_url("https://public.blob.vercel-storage.com.evil.example/a.pdf"));
        assert!(!blob.holds_url("http://10.0.0.1/notice.pdf"));
    }

    #[tokio::test]
    async fn fetch_rejects_blobs_over_the_upload_ceiling() {
        let server = MockServer::start().await;
        let oversized = vec![b'x'; MAX_UPLOAD_BYTES as usize + 1];
        Mock::given(method("GET"))
            .and(path("/huge.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(oversized))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch(&format!("{}/huge.pdf", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unexpected(msg) if msg.contains("exceeds")));
    }

    #[tokio::test]
    async fn delete_posts_the_url_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delete"))
            .and(body_json(json!({ "urls": ["https://blob.test/a.pdf"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server).delete("https://blob.test/a.pdf").await.unwrap();
    }
}
