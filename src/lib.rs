//! infergate - Inference gateway for a model-serving control plane
//!
//! This library provides the resilient upstream HTTP client, endpoint
//! liveness probing and the OpenAI-compatible completion proxy with SSE
//! streaming relay.

pub mod backend;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
