//! Configuration parsing and validation for infergate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

use crate::client::{HealthConfig, RetryPolicy};
use crate::endpoint::Engine;

/// Longest endpoint name accepted (KServe inference-service name limit).
pub const MAX_ENDPOINT_NAME_LEN: usize = 63;

/// Root configuration structure, built from [`RawConfig`] once keys are resolved.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub health: HealthSettings,
    pub endpoints: Vec<EndpointConfig>,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

/// Outbound client settings for calls to inference engines.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Deadline for a unary engine call, per attempt
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TCP connect deadline
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Attempts for unary engine calls (>= 1)
    #[serde(default = "default_client_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_client_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_attempts: default_client_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Liveness probe settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_attempts")]
    pub max_attempts: u32,
}

fn default_health_timeout_secs() -> u64 {
    crate::client::health::DEFAULT_HEALTH_TIMEOUT.as_secs()
}

fn default_health_attempts() -> u32 {
    crate::client::health::MAX_SERVICE_HEALTH_ATTEMPTS
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout_secs(),
            max_attempts: default_health_attempts(),
        }
    }
}

impl HealthSettings {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
        }
    }
}

const REDACTED: &str = "[REDACTED]";

/// Bearer token sent to an engine. Formats and serializes as `[REDACTED]`.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey::from(s.to_string())
    }
}

/// Where an endpoint's key came from, reported by `infergate check`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// `api_key` written out in the file
    Literal,
    /// `api_key` with `${VAR}` references
    EnvExpanded,
    /// `INFERGATE_<NAME>_API_KEY`, holding the variable name
    Convention(String),
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => f.write_str("from config"),
            KeySource::EnvExpanded => f.write_str("from ${VAR} reference"),
            KeySource::Convention(var) => write!(f, "from {}", var),
            KeySource::None => f.write_str("not set"),
        }
    }
}

/// A deployed inference endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Endpoint name; clients pass it as the request's `model`
    pub name: String,
    /// Engine serving the model
    pub engine: Engine,
    /// Base URL of the engine (e.g., "http://llama.nai-admin.svc.cluster.local")
    pub url: String,
    /// Optional bearer token sent to the engine
    pub api_key: Option<ApiKey>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string, resolving endpoint keys from
    /// the environment.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_with_env(content).map(|(config, _)| config)
    }

    /// Like [`Config::parse_str`], also reporting where each key came from.
    pub fn parse_with_env(
        content: &str,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;
        Ok((config, key_sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            tracing::warn!("No endpoints configured - inference requests will be rejected");
        }

        if self.client.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "client.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.health.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "health.max_attempts must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            validate_endpoint_name(&endpoint.name).map_err(ConfigError::Validation)?;
            if !seen.insert(endpoint.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            if endpoint.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Endpoint '{}' has empty URL",
                    endpoint.name
                )));
            }
            if let Err(e) = reqwest::Url::parse(&endpoint.url) {
                return Err(ConfigError::Validation(format!(
                    "Endpoint '{}' has invalid URL '{}': {}",
                    endpoint.name, endpoint.url, e
                )));
            }
        }

        Ok(())
    }
}

/// Check that `name` can be used as an inference-service name.
///
/// Names are DNS-1035 labels: lowercase alphanumerics and '-', starting with
/// a letter, not ending with '-', at most [`MAX_ENDPOINT_NAME_LEN`] bytes.
pub fn validate_endpoint_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Endpoint name must not be empty".to_string());
    }
    if name.len() > MAX_ENDPOINT_NAME_LEN {
        return Err(format!(
            "Length of name should be less than {} for the name {}",
            MAX_ENDPOINT_NAME_LEN, name
        ));
    }
    let starts_with_letter = name.starts_with(|c: char| c.is_ascii_lowercase());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !starts_with_letter || !valid_chars || name.ends_with('-') {
        return Err(format!(
            "Endpoint name '{}' must consist of lowercase alphanumerics or '-', start with a letter and end with an alphanumeric",
            name
        ));
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for endpoint '{endpoint}': {message}")]
    EnvVar {
        var: String,
        endpoint: String,
        message: String,
    },
}

/// An `[[endpoints]]` entry as written; `api_key` may hold `${VAR}` references.
#[derive(Deserialize)]
pub struct RawEndpointConfig {
    name: String,
    engine: Engine,
    url: String,
    api_key: Option<String>,
}

/// The TOML document before key resolution.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    client: ClientConfig,
    #[serde(default)]
    health: HealthSettings,
    #[serde(default)]
    endpoints: Vec<RawEndpointConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Substitute every `${VAR}` in `input` using `lookup`.
fn expand_env_vars_with<F>(
    input: &str,
    endpoint_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_error = |var: &str, message: String| ConfigError::EnvVar {
        var: var.to_string(),
        endpoint: endpoint_name.to_string(),
        message,
    };

    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;
    while let Some((before, reference)) = rest.split_once("${") {
        expanded.push_str(before);
        let (var, after) = reference
            .split_once('}')
            .ok_or_else(|| env_error("<unclosed>", "Unclosed '${' in api_key".to_string()))?;
        if var.is_empty() {
            return Err(env_error(var, "Empty variable name in '${}'".to_string()));
        }
        let value = lookup(var)
            .ok_or_else(|| env_error(var, "referenced from api_key".to_string()))?;
        expanded.push_str(&value);
        rest = after;
    }
    expanded.push_str(rest);

    Ok(expanded)
}

fn expand_env_vars(input: &str, endpoint_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, endpoint_name, |name| std::env::var(name).ok())
}

/// Variable consulted for an endpoint with no `api_key`, e.g.
/// `llama-3-8b` -> `INFERGATE_LLAMA_3_8B_API_KEY`.
pub fn convention_env_var_name(endpoint_name: &str) -> String {
    let upper_snake = endpoint_name.to_uppercase().replace(['-', ' '], "_");
    format!("INFERGATE_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(endpoint_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(endpoint_name);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Resolve endpoint keys. `${VAR}` references are expanded, literals are
    /// kept, and a missing key falls back to [`convention_env_var_name`].
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        let mut key_sources = Vec::with_capacity(raw.endpoints.len());

        for re in raw.endpoints {
            let (api_key, source) = match re.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &re.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&re.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((re.name.clone(), source));

            endpoints.push(EndpointConfig {
                name: re.name,
                engine: re.engine,
                url: re.url,
                api_key,
            });
        }

        let config = Config {
            server: raw.server,
            client: raw.client,
            health: raw.health,
            endpoints,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_with_env(&content)
    }
}
