// HTTP transport for webhook deliveries
//
// The dispatcher only sees the Transport trait; HttpTransport is the reqwest-backed
// implementation. Tests plug in fakes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::error::{Result, WebhookError};

/// Connection establishment bound, independent of the per-attempt timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of the response body kept for diagnostics
const MAX_RESPONSE_BODY_BYTES: usize = 1024;

/// One outgoing webhook POST
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Exact bytes that were signed
    pub body: Vec<u8>,
    pub timeout: Duration,
}

impl WebhookRequest {
    /// Value of the first header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response received from an endpoint, whatever its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Truncated response body
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

/// Sends webhook requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: WebhookRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
///
/// Redirects are not followed: a 3xx is reported as a non-2xx response.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("hookline/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(|e| WebhookError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: WebhookRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Network(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Network(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let response = self
            .client
            .post(&request.url)
            .headers(headers)
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(request.timeout)
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => {
                let end = bytes.len().min(MAX_RESPONSE_BODY_BYTES);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            Err(e) => {
                debug!(error = %e, "Failed to read webhook response body");
                String::new()
            }
        };

        Ok(TransportResponse { status, body })
    }
}
