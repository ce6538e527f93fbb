//! HTTP client for the generation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::traits::enricher::Enricher;
use crate::types::enrichment::{EnrichmentRequest, ImageAsset, TextEnrichment};

#[derive(Serialize)]
struct ImageRequest<'a> {
    word: &'a str,
    language: &'a str,
    definition: &'a str,
}

/// Generation service reached over HTTP.
///
/// `POST {base}/v1/text` and `POST {base}/v1/image` with JSON bodies.
#[derive(Clone)]
pub struct HttpEnricher {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEnricher {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Use a preconfigured reqwest client (proxies, TLS, pool limits).
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, call: &'static str, path: &str, body: &B) -> ServiceResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: serde::de::DeserializeOwned,
    {
        let start = std::time::Instant::now();

        let mut request = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(call, error = %e, "generation service request failed");
            transport_error(call, start.elapsed(), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            warn!(call, status = %status, error = %message, "generation service error");
            return Err(classify_status(status, retry_after, message));
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

        debug!(call, duration_ms = start.elapsed().as_millis() as u64, "generation service call");
        Ok(parsed)
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich_text(&self, request: &EnrichmentRequest) -> ServiceResult<TextEnrichment> {
        self.post("text", "/v1/text", request).await
    }

    async fn generate_image(
        &self,
        request: &EnrichmentRequest,
        text: &TextEnrichment,
    ) -> ServiceResult<ImageAsset> {
        let body = ImageRequest {
            word: &request.word,
            language: &request.language,
            definition: &text.definition,
        };
        self.post("image", "/v1/image", &body).await
    }
}

fn transport_error(call: &'static str, elapsed: Duration, e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout { call, elapsed }
    } else {
        ServiceError::Network(e.to_string())
    }
}

/// Map a non-success status to a classified service error.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, message: String) -> ServiceError {
    match status.as_u16() {
        429 => ServiceError::RateLimited { retry_after },
        408 | 500..=599 => ServiceError::Server {
            status: status.as_u16(),
            message,
        },
        400 | 404 | 422 => ServiceError::InvalidInput(message),
        code => ServiceError::Rejected { status: code, message },
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(response: impl Into<String>) -> String {
        let response = response.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> EnrichmentRequest {
        EnrichmentRequest {
            word: "chat".into(),
            language: "fr".into(),
        }
    }

    #[test]
    fn test_status_classification() {
        let kind = |code: u16| classify_status(StatusCode::from_u16(code).unwrap(), None, String::new()).kind();

        assert_eq!(kind(429), FailureKind::Transient);
        assert_eq!(kind(408), FailureKind::Transient);
        assert_eq!(kind(503), FailureKind::Transient);
        assert_eq!(kind(400), FailureKind::Fatal);
        assert_eq!(kind(422), FailureKind::Fatal);
        assert_eq!(kind(403), FailureKind::Fatal);
    }

    #[tokio::test]
    async fn test_text_call_success() {
        let body = r#"{"definition":"petit félin","etymology":"latin cattus","audio_ref":"a/chat.mp3"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let enricher = HttpEnricher::new(serve_once(response).await).with_api_key("secret");

        let text = enricher.enrich_text(&request()).await.unwrap();
        assert_eq!(text.etymology, "latin cattus");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let base = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\nretry-after: 7\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let err = HttpEnricher::new(base).enrich_text(&request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_transient() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 5\r\nconnection: close\r\n\r\nnope!",
        )
        .await;

        let err = HttpEnricher::new(base).enrich_text(&request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse(_)));
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpEnricher::new(format!("http://{addr}"))
            .enrich_text(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Network(_)));
    }
}
