//! Retry-with-fixed-delay request execution.
//!
//! A [`RequestDescriptor`] captures everything needed to send one request:
//! target, method, body, headers, retry policy and per-call timeout. The
//! [`ResilientClient`] sends it up to `max_attempts` times:
//! - `200 OK` returns immediately
//! - transport errors and any other status count as a failed attempt
//! - the policy delay is slept between attempts, never after the last one
//! - exhaustion yields [`ClientError::RetryExhausted`] with a bounded list of
//!   per-attempt failures (each one is also logged as it happens)

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use std::collections::HashMap;
use std::time::Duration;

use super::transport::{HttpTransport, Transport, TransportError, TransportResponse};

/// Attempts made when no policy is given.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts when no policy is given.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-call deadline when none is given.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on failures retained on a [`ClientError::RetryExhausted`].
const MAX_RECORDED_FAILURES: usize = 10;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Back-to-back attempts with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Summary of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Upstream status, when the upstream answered at all.
    pub status: Option<u16>,
    pub timed_out: bool,
    pub reason: String,
}

impl AttemptFailure {
    fn from_status(attempt: u32, status: StatusCode) -> Self {
        Self {
            attempt,
            status: Some(status.as_u16()),
            timed_out: false,
            reason: format!("unexpected status {}", status),
        }
    }

    fn from_transport(attempt: u32, err: &TransportError) -> Self {
        Self {
            attempt,
            status: None,
            timed_out: err.timed_out,
            reason: err.to_string(),
        }
    }
}

/// Errors from the resilient client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request could not be built. Never retried.
    #[error("Invalid request: {0}")]
    RequestConstruction(String),

    /// A single attempt failed at the connection level.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A single attempt got an answer other than `200 OK`.
    #[error("Unexpected upstream status {status}")]
    NonSuccessStatus { status: StatusCode },

    /// Every attempt failed.
    ///
    /// Per-attempt detail stays in `failures`, out of the message.
    #[error("Failed to make request after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        failures: Vec<AttemptFailure>,
    },
}

impl ClientError {
    /// True when every recorded attempt ended in a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Transport(err) => err.timed_out,
            ClientError::RetryExhausted { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|f| f.timed_out)
            }
            _ => false,
        }
    }
}

/// Immutable description of one logical request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: Url,
    method: Method,
    body: Bytes,
    headers: HeaderMap,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RequestDescriptor {
    /// Parse the target and method.
    ///
    /// Only absolute `http`/`https` URLs with a host are accepted.
    pub fn new(endpoint: &str, method: &str) -> Result<Self, ClientError> {
        let url = Url::parse(endpoint).map_err(|e| {
            ClientError::RequestConstruction(format!("invalid URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::RequestConstruction(format!(
                "unsupported URL scheme '{}' in '{}'",
                url.scheme(),
                endpoint
            )));
        }
        if url.host_str().is_none() {
            return Err(ClientError::RequestConstruction(format!(
                "URL '{}' has no host",
                endpoint
            )));
        }

        let method = Method::from_bytes(method.as_bytes()).map_err(|_| {
            ClientError::RequestConstruction(format!("invalid HTTP method '{}'", method))
        })?;

        Ok(Self {
            url,
            method,
            body: Bytes::new(),
            headers: HeaderMap::new(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn get(endpoint: &str) -> Result<Self, ClientError> {
        Self::new(endpoint, "GET")
    }

    pub fn post(endpoint: &str) -> Result<Self, ClientError> {
        Self::new(endpoint, "POST")
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ClientError::RequestConstruction(format!("invalid header name '{}'", name))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            ClientError::RequestConstruction(format!("invalid value for header '{}'", name))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn with_headers(self, headers: &HashMap<String, String>) -> Result<Self, ClientError> {
        headers
            .iter()
            .try_fold(self, |desc, (name, value)| desc.with_header(name, value))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Sends [`RequestDescriptor`]s with bounded retries.
#[derive(Debug, Clone)]
pub struct ResilientClient<T = HttpTransport> {
    transport: T,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build a descriptor from loose parts and execute it.
    pub async fn make_request_with_retry(
        &self,
        endpoint: &str,
        method: &str,
        body: impl Into<Bytes>,
        headers: &HashMap<String, String>,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<TransportResponse, ClientError> {
        let request = RequestDescriptor::new(endpoint, method)?
            .with_body(body)
            .with_headers(headers)?
            .with_retry(RetryPolicy::new(max_attempts, delay));

        self.execute(&request).await
    }

    /// Execute a descriptor according to its retry policy.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, ClientError> {
        let policy = request.retry();
        if policy.max_attempts == 0 {
            return Err(ClientError::RequestConstruction(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut failures = Vec::new();

        for attempt in 1..=policy.max_attempts {
            let failure = match self.transport.send(request).await {
                Ok(response) if response.status == StatusCode::OK => {
                    if attempt > 1 {
                        tracing::debug!(
                            url = %request.url(),
                            attempt,
                            "Upstream request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Ok(response) => AttemptFailure::from_status(attempt, response.status),
                Err(err) => AttemptFailure::from_transport(attempt, &err),
            };

            tracing::warn!(
                url = %request.url(),
                method = %request.method(),
                attempt,
                max_attempts = policy.max_attempts,
                reason = %failure.reason,
                "Upstream request attempt failed"
            );

            if failures.len() < MAX_RECORDED_FAILURES {
                failures.push(failure);
            }

            if attempt < policy.max_attempts && !policy.delay.is_zero() {
                tokio::time::sleep(policy.delay).await;
            }
        }

        Err(ClientError::RetryExhausted {
            attempts: policy.max_attempts,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::scripted::{Scripted, ScriptedTransport};

    fn descriptor(policy: RetryPolicy) -> RequestDescriptor {
        RequestDescriptor::get("http://engine.test/v1/models")
            .unwrap()
            .with_retry(policy)
    }

    #[test]
    fn test_descriptor_rejects_missing_scheme() {
        let err = RequestDescriptor::get(":www.abv").unwrap_err();
        assert!(matches!(err, ClientError::RequestConstruction(_)));
    }

    #[test]
    fn test_descriptor_rejects_non_http_scheme() {
        let err = RequestDescriptor::get("ftp://files.test/a").unwrap_err();
        assert!(matches!(err, ClientError::RequestConstruction(_)));
    }

    #[test]
    fn test_descriptor_rejects_bad_method() {
        let err = RequestDescriptor::new("http://engine.test", "GE T").unwrap_err();
        assert!(matches!(err, ClientError::RequestConstruction(_)));
    }

    #[test]
    fn test_descriptor_rejects_bad_header() {
        let err = RequestDescriptor::get("http://engine.test")
            .unwrap()
            .with_header("x-bad\n", "v")
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestConstruction(_)));
    }

    #[test]
    fn test_descriptor_keeps_headers_and_body() {
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "abc".to_string());
        let desc = RequestDescriptor::post("https://engine.test/v1/completions")
            .unwrap()
            .with_body(r#"{"model":"m"}"#)
            .with_headers(&headers)
            .unwrap()
            .with_timeout(Duration::from_secs(7));

        assert_eq!(*desc.method(), Method::POST);
        assert_eq!(desc.headers().get("x-request-id").unwrap(), "abc");
        assert_eq!(desc.body().as_ref(), br#"{"model":"m"}"#);
        assert_eq!(desc.timeout(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![Scripted::Status(200)]);
        let client = ResilientClient::new(transport.clone());

        let response = client
            .execute(&descriptor(RetryPolicy::new(5, Duration::from_millis(10))))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Status(503),
            Scripted::Failure("connection refused"),
            Scripted::Status(200),
        ]);
        let client = ResilientClient::new(transport.clone());

        let result = client
            .execute(&descriptor(RetryPolicy::new(5, Duration::from_secs(1))))
            .await;

        assert!(result.is_ok());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_makes_exactly_n_attempts() {
        let transport = ScriptedTransport::repeating(Scripted::Status(500));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .execute(&descriptor(RetryPolicy::new(4, Duration::from_millis(250))))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 4);
        match err {
            ClientError::RetryExhausted { attempts, failures } => {
                assert_eq!(attempts, 4);
                assert_eq!(failures.len(), 4);
                assert!(failures.iter().all(|f| f.status == Some(500)));
                assert_eq!(failures[3].attempt, 4);
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ok_success_status_is_a_failure() {
        // Only 200 counts; 204 is retried like any other status.
        let transport = ScriptedTransport::repeating(Scripted::Status(204));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .execute(&descriptor(RetryPolicy::immediate(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RetryExhausted { .. }));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts_not_after_last() {
        let transport = ScriptedTransport::repeating(Scripted::Status(503));
        let client = ResilientClient::new(transport.clone());
        let start = tokio::time::Instant::now();

        let _ = client
            .execute(&descriptor(RetryPolicy::new(3, Duration::from_secs(2))))
            .await;

        // Attempt 1 at 0s, attempt 2 at 2s, attempt 3 at 4s, no trailing sleep.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let transport = ScriptedTransport::repeating(Scripted::Status(500));
        let client = ResilientClient::new(transport.clone());
        let start = tokio::time::Instant::now();

        let _ = client
            .execute(&descriptor(RetryPolicy::new(1, Duration::from_secs(30))))
            .await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected_without_network() {
        let transport = ScriptedTransport::repeating(Scripted::Status(200));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .execute(&descriptor(RetryPolicy::immediate(0)))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestConstruction(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_make_request_with_retry_invalid_url_makes_no_calls() {
        let transport = ScriptedTransport::repeating(Scripted::Status(200));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .make_request_with_retry(
                "not a url",
                "POST",
                Bytes::new(),
                &HashMap::new(),
                3,
                Duration::ZERO,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestConstruction(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_same_body_sent_on_every_attempt() {
        let transport =
            ScriptedTransport::new(vec![Scripted::Status(502), Scripted::Status(200)]);
        let client = ResilientClient::new(transport.clone());

        client
            .make_request_with_retry(
                "http://engine.test/v1/completions",
                "POST",
                Bytes::from_static(b"payload"),
                &HashMap::new(),
                2,
                Duration::ZERO,
            )
            .await
            .unwrap();

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies.iter().all(|b| b.as_ref() == b"payload"));
    }

    #[tokio::test]
    async fn test_exhausted_message_is_generic() {
        let transport = ScriptedTransport::repeating(Scripted::Failure("secret-host:9999 refused"));
        let client = ResilientClient::new(transport);

        let err = client
            .execute(&descriptor(RetryPolicy::immediate(2)))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert_eq!(message, "Failed to make request after 2 attempts");
        assert!(!message.contains("secret-host"));
    }

    #[tokio::test]
    async fn test_recorded_failures_are_bounded() {
        let transport = ScriptedTransport::repeating(Scripted::Status(500));
        let client = ResilientClient::new(transport.clone());

        let err = client
            .execute(&descriptor(RetryPolicy::immediate(25)))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 25);
        match err {
            ClientError::RetryExhausted { attempts, failures } => {
                assert_eq!(attempts, 25);
                assert_eq!(failures.len(), MAX_RECORDED_FAILURES);
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_timeouts_reported_as_timeout() {
        let transport = ScriptedTransport::repeating(Scripted::Timeout);
        let client = ResilientClient::new(transport);

        let err = client
            .execute(&descriptor(RetryPolicy::immediate(2)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }
}
