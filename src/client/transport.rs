//! The network seam under the resilient client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;

use super::retry::RequestDescriptor;

/// A fully drained upstream response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Connection-level failure of a single attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// The attempt hit its per-call timeout.
    pub timed_out: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            message: format!("request timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Executes one request attempt.
///
/// Implementations must read the response body to completion before
/// returning so the underlying connection can be reused.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor)
        -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build a transport with a connect timeout and no overall deadline.
    ///
    /// Deadlines are applied per call from the request descriptor.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .timeout(request.timeout());

        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        // Drain so the connection goes back to the pool.
        let body = response.bytes().await?;

        Ok(TransportResponse { status, body })
    }
}
