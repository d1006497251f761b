use std::time::Duration;

use async_trait::async_trait;
use beacon_protocol::EventBatch;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use url::Url;

use crate::config::ClientConfig;

/// Errors raised while delivering a batch.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The batch could not be serialized.
    #[error("could not encode batch")]
    Encode(#[source] serde_json::Error),

    /// The request did not reach the server or timed out.
    #[error("could not send batch")]
    Network(#[source] reqwest::Error),

    /// The server refused the batch as invalid.
    #[error("batch rejected with status {status}")]
    Rejected {
        /// The HTTP status code.
        status: StatusCode,
        /// The reason code from the response body, if any.
        code: Option<String>,
    },

    /// The server asked the client to slow down.
    #[error("batch throttled")]
    Throttled {
        /// The delay requested in the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// The server failed to handle the batch.
    #[error("server responded with status {status}")]
    Server {
        /// The HTTP status code.
        status: StatusCode,
    },
}

impl TransportError {
    /// Returns `true` if sending the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Throttled { .. } | Self::Server { .. } => true,
            Self::Encode(_) | Self::Rejected { .. } => false,
        }
    }

    /// Returns the delay requested by the server before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns the name used in metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Encode(_) => "encode",
            Self::Network(_) => "network",
            Self::Rejected { .. } => "rejected",
            Self::Throttled { .. } => "throttled",
            Self::Server { .. } => "server",
        }
    }
}

/// Delivers batches to the ingest endpoint.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Sends one batch. Each call is a single attempt.
    async fn send(&self, batch: &EventBatch) -> Result<(), TransportError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

/// Posts batches as JSON over HTTP.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Creates a transport for the configured endpoint.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("beacon-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::Network)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let body = serde_json::to_vec(batch).map_err(TransportError::Encode)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(TransportError::Network)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return Err(TransportError::Throttled { retry_after });
        }

        if status.is_client_error() {
            let code = match response.bytes().await {
                Ok(bytes) => serde_json::from_slice::<ErrorBody>(&bytes)
                    .ok()
                    .and_then(|body| body.code),
                Err(_) => None,
            };
            return Err(TransportError::Rejected { status, code });
        }

        Err(TransportError::Server { status })
    }
}

/// Parses a `Retry-After` value given in seconds.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}
