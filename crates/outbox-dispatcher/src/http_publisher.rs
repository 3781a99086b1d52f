//! HTTP publisher.
//!
//! Posts each envelope to `{base_url}/{destination}`. Any non-2xx response is
//! a failed publish.

use crate::error::{DispatchError, DispatchResult};
use crate::publisher::Publisher;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP publisher configuration.
#[derive(Debug, Clone)]
pub struct HttpPublisherConfig {
    /// Base URL of the broker's ingest API.
    pub base_url: String,
    /// Bearer token, if the endpoint requires one.
    pub auth_token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl HttpPublisherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Publishes envelopes over HTTP.
pub struct HttpPublisher {
    config: HttpPublisherConfig,
    client: Client,
}

impl HttpPublisher {
    pub fn new(config: HttpPublisherConfig) -> DispatchResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(DispatchError::Config("HTTP base URL must not be empty".to_string()));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// URL an envelope for `destination` is posted to.
    pub fn endpoint(&self, destination: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            destination.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, destination: &str, envelope: &[u8]) -> DispatchResult<()> {
        let url = self.endpoint(destination);

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(envelope.to_vec());
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "Broker rejected envelope");
            return Err(DispatchError::Publish(format!("HTTP {status}: {body}")));
        }

        debug!(url = %url, status = %status, "Envelope accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one request with a canned status line and hand back the raw request.
    async fn serve_once(status_line: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (base_url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let publisher = HttpPublisher::new(HttpPublisherConfig::new("http://broker:8080/ingest/")).unwrap();
        assert_eq!(publisher.endpoint("outboxQueue"), "http://broker:8080/ingest/outboxQueue");
        assert_eq!(publisher.endpoint("/movies"), "http://broker:8080/ingest/movies");
    }

    #[test]
    fn test_rejects_empty_base_url() {
        assert!(matches!(
            HttpPublisher::new(HttpPublisherConfig::new("  ")),
            Err(DispatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_posts_envelope_with_token() {
        let (base_url, server) = serve_once("202 Accepted").await;
        let mut config = HttpPublisherConfig::new(base_url);
        config.auth_token = Some("secret".to_string());
        let publisher = HttpPublisher::new(config).unwrap();

        publisher
            .publish("outboxQueue", br#"{"action":"CREATE","data":{},"traceparent":""}"#)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /outboxQueue HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.ends_with(r#"{"action":"CREATE","data":{},"traceparent":""}"#));
    }

    #[tokio::test]
    async fn test_publish_non_success_is_error() {
        let (base_url, server) = serve_once("503 Service Unavailable").await;
        let publisher = HttpPublisher::new(HttpPublisherConfig::new(base_url)).unwrap();

        let err = publisher.publish("outboxQueue", b"{}").await.unwrap_err();
        assert!(matches!(err, DispatchError::Publish(ref msg) if msg.contains("503")));
        server.await.unwrap();
    }
}
