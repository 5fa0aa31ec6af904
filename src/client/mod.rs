//! Outbound HTTP plumbing.
//!
//! This module provides the resilient request/retry client used for
//! unary upstream calls, and the liveness prober built on top of it.

pub mod health;
pub mod retry;
mod transport;

pub use health::{HealthConfig, HealthProber, HealthStatus};
pub use retry::{AttemptFailure, ClientError, RequestDescriptor, ResilientClient, RetryPolicy};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
