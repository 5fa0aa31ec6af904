//! Integration tests for the full Config::from_file_with_env pipeline.
//!
//! TOML file -> raw parse -> env var expansion -> validated Config with
//! KeySource metadata. Each test uses its own env var names so tests can run
//! in parallel.

use std::io::Write;

use infergate::config::{Config, ConfigError, KeySource};
use infergate::endpoint::Engine;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_full_config_round_trip() {
    let file = write_config(
        r#"
[server]
listen = "0.0.0.0:9090"

[client]
request_timeout_secs = 30
max_attempts = 4
retry_delay_ms = 250

[health]
timeout_secs = 2
max_attempts = 5

[logging]
level = "debug"

[[endpoints]]
name = "llama-3-8b"
engine = "vllm"
url = "http://llama-3-8b.nai-admin.svc.cluster.local"
api_key = "literal-key"

[[endpoints]]
name = "nemotron"
engine = "nim"
url = "http://nemotron.nai-admin.svc.cluster.local"
"#,
    );

    let (config, key_sources) = Config::from_file_with_env(file.path()).unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:9090");
    assert_eq!(config.client.request_timeout().as_secs(), 30);
    assert_eq!(config.client.retry_policy().max_attempts, 4);
    assert_eq!(config.client.retry_policy().delay.as_millis(), 250);
    assert_eq!(config.health.to_health_config().max_attempts, 5);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.endpoints[1].engine, Engine::Nim);
    assert_eq!(
        config.endpoints[0].api_key.as_ref().unwrap().expose_secret(),
        "literal-key"
    );
    assert_eq!(key_sources[0].1, KeySource::Literal);
}

#[test]
fn test_env_reference_is_expanded() {
    let var_name = "INFERGATE_IT_EXPAND_KEY";
    unsafe { std::env::set_var(var_name, "from-env") };

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:0"

[[endpoints]]
name = "expand-test"
engine = "vllm"
url = "http://expand-test.local"
api_key = "${{{}}}"
"#,
        var_name
    ));

    let (config, key_sources) = Config::from_file_with_env(file.path()).unwrap();

    assert_eq!(
        config.endpoints[0].api_key.as_ref().unwrap().expose_secret(),
        "from-env"
    );
    assert_eq!(key_sources[0].1, KeySource::EnvExpanded);

    unsafe { std::env::remove_var(var_name) };
}

#[test]
fn test_missing_env_var_names_variable_and_endpoint() {
    let var_name = "INFERGATE_IT_DEFINITELY_UNSET";
    unsafe { std::env::remove_var(var_name) };

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:0"

[[endpoints]]
name = "missing-var"
engine = "tgi"
url = "http://missing-var.local"
api_key = "${{{}}}"
"#,
        var_name
    ));

    let err = Config::from_file_with_env(file.path()).unwrap_err();

    match err {
        ConfigError::EnvVar { var, endpoint, .. } => {
            assert_eq!(var, var_name);
            assert_eq!(endpoint, "missing-var");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_convention_key_is_discovered() {
    unsafe { std::env::set_var("INFERGATE_CONVENTION_IT_API_KEY", "conv-key") };

    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:0"

[[endpoints]]
name = "convention-it"
engine = "vllm"
url = "http://convention-it.local"
"#,
    );

    let (config, key_sources) = Config::from_file_with_env(file.path()).unwrap();

    assert_eq!(
        config.endpoints[0].api_key.as_ref().unwrap().expose_secret(),
        "conv-key"
    );
    assert_eq!(
        key_sources[0].1,
        KeySource::Convention("INFERGATE_CONVENTION_IT_API_KEY".to_string())
    );

    unsafe { std::env::remove_var("INFERGATE_CONVENTION_IT_API_KEY") };
}

#[test]
fn test_invalid_endpoint_name_rejected() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:0"

[[endpoints]]
name = "Bad_Name"
engine = "vllm"
url = "http://bad.local"
"#,
    );

    let err = Config::from_file_with_env(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_unknown_engine_rejected() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:0"

[[endpoints]]
name = "llama"
engine = "triton"
url = "http://llama.local"
"#,
    );

    let err = Config::from_file_with_env(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Config::from_file_with_env("/nonexistent/infergate.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
