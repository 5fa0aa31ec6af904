//! Inference endpoints and the engines that serve them.
//!
//! An endpoint is a named deployment of a model on one engine. Clients
//! address it through the `model` field of their inference requests.

mod registry;

pub use registry::{Endpoint, EndpointRegistry};

use serde::{Deserialize, Serialize};

/// Backend inference runtime serving an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Hugging Face text-generation-inference
    Tgi,
    /// vLLM behind a KServe v2 predictor
    Vllm,
    /// NVIDIA NIM
    Nim,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Tgi => "tgi",
            Engine::Vllm => "vllm",
            Engine::Nim => "nim",
        }
    }

    /// Path of the engine's liveness check, relative to the endpoint base URL.
    pub fn liveness_path(&self) -> &'static str {
        match self {
            Engine::Tgi => "/health",
            Engine::Vllm => "/v2/health/live",
            Engine::Nim => "/v1/health/live",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
