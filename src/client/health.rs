//! Liveness probing for inference endpoints.
//!
//! A probe is one GET descriptor sent through the [`ResilientClient`] with a
//! fixed timeout and a bounded number of back-to-back attempts. The result is
//! classified as:
//! - **Healthy**: some attempt returned 200
//! - **Critical**: every attempt failed (non-200, timeout, connection error)
//! - **Unknown**: the probe could not even be built (bad target URL)

use serde::Serialize;
use std::time::Duration;

use super::retry::{ClientError, RequestDescriptor, ResilientClient, RetryPolicy};
use super::transport::Transport;

/// Deadline for a single probe attempt.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per probe before the endpoint is declared critical.
pub const MAX_SERVICE_HEALTH_ATTEMPTS: u32 = 3;

/// Classified endpoint health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Critical,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HEALTH_TIMEOUT,
            max_attempts: MAX_SERVICE_HEALTH_ATTEMPTS,
        }
    }
}

/// Classifies endpoints by polling their liveness URL.
#[derive(Debug, Clone)]
pub struct HealthProber<T> {
    client: ResilientClient<T>,
    config: HealthConfig,
}

impl<T: Transport> HealthProber<T> {
    pub fn new(client: ResilientClient<T>, config: HealthConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> HealthConfig {
        self.config
    }

    /// Probe `endpoint_url` and classify the outcome.
    pub async fn check_health(&self, endpoint_url: &str) -> HealthStatus {
        let probe = match RequestDescriptor::get(endpoint_url) {
            Ok(desc) => desc
                .with_timeout(self.config.timeout)
                .with_retry(RetryPolicy::immediate(self.config.max_attempts)),
            Err(err) => {
                tracing::warn!(url = %endpoint_url, error = %err, "Cannot build health probe");
                return HealthStatus::Unknown;
            }
        };

        match self.client.execute(&probe).await {
            Ok(_) => HealthStatus::Healthy,
            Err(ClientError::RequestConstruction(reason)) => {
                tracing::warn!(url = %endpoint_url, reason = %reason, "Invalid health probe");
                HealthStatus::Unknown
            }
            Err(err) => {
                tracing::info!(url = %endpoint_url, error = %err, "Endpoint failed liveness probe");
                HealthStatus::Critical
            }
        }
    }
}
