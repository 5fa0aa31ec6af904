//! Endpoint lookup by name.

use super::Engine;
use crate::config::{ApiKey, EndpointConfig};
use crate::error::{Error, Result};

/// A resolved inference endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub engine: Engine,
    pub url: String,
    pub api_key: Option<ApiKey>,
}

impl From<&EndpointConfig> for Endpoint {
    fn from(config: &EndpointConfig) -> Self {
        Self {
            name: config.name.clone(),
            engine: config.engine,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

impl Endpoint {
    /// Join `path` onto the endpoint's base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    pub fn liveness_url(&self) -> String {
        self.url_for(self.engine.liveness_path())
    }
}

/// Immutable set of configured endpoints.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    pub fn new(configs: &[EndpointConfig]) -> Self {
        Self {
            endpoints: configs.iter().map(Endpoint::from).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Resolve the endpoint serving `model`.
    pub fn resolve(&self, model: &str) -> Result<Endpoint> {
        if model.is_empty() {
            return Err(Error::NotFound(
                "request does not name a model".to_string(),
            ));
        }
        let endpoint = self.get(model).cloned().ok_or_else(|| {
            Error::NotFound(format!("No endpoint found for model '{}'", model))
        })?;

        tracing::debug!(
            endpoint = %endpoint.name,
            engine = %endpoint.engine,
            "Resolved inference endpoint"
        );
        Ok(endpoint)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}
