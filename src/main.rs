//! infergate - Inference gateway for a model-serving control plane
//!
//! Fronts deployed inference engines with an OpenAI-compatible API,
//! retrying unary calls, relaying streams as SSE and probing endpoint
//! liveness.

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use infergate::client::{HealthConfig, HealthProber, HttpTransport, ResilientClient};
use infergate::config::Config;
use infergate::proxy::run_server;

#[derive(Parser)]
#[command(name = "infergate")]
#[command(about = "Inference gateway for a model-serving control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured endpoints
    Endpoints {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Probe a liveness URL once and print its health
    Probe {
        /// Liveness URL (e.g. http://llama.svc/v2/health/live)
        url: String,

        /// Per-attempt timeout in seconds
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,

        /// Attempts before declaring the endpoint critical
        #[arg(short, long, default_value_t = 3)]
        attempts: u32,
    },
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Install the subscriber. `RUST_LOG` wins; otherwise the filter can be
/// replaced once the config's `[logging]` level is known.
fn init_tracing() -> Option<FilterHandle> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new("infergate=info,tower_http=info"), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    (!from_env).then_some(handle)
}

fn apply_log_level(handle: Option<&FilterHandle>, level: &str) {
    let Some(handle) = handle else {
        return;
    };
    let directives = format!("infergate={level},tower_http={level}");
    match EnvFilter::try_new(&directives) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                tracing::warn!(error = %e, "Failed to apply configured log level");
            }
        }
        Err(e) => tracing::warn!(level = %level, error = %e, "Ignoring invalid log level"),
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let (config, key_sources) = Config::from_file_with_env(path)?;
    for (name, source) in &key_sources {
        tracing::debug!(endpoint = %name, source = %source, "Resolved endpoint API key");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter_handle = init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let mut cfg = load_config(&config)?;
            apply_log_level(filter_handle.as_ref(), &cfg.logging.level);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            tracing::info!(endpoints = cfg.endpoints.len(), "Configuration loaded");
            run_server(cfg).await
        }

        Commands::Check { config } => {
            tracing::info!(config = %config, "Checking configuration");
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;

            println!("Configuration OK: {}", config);
            println!("  listen: {}", cfg.server.listen);
            println!(
                "  client: timeout {}s, {} attempt(s), {}ms delay",
                cfg.client.request_timeout_secs,
                cfg.client.max_attempts,
                cfg.client.retry_delay_ms
            );
            println!(
                "  health: timeout {}s, {} attempt(s)",
                cfg.health.timeout_secs, cfg.health.max_attempts
            );
            for (name, source) in &key_sources {
                println!("  endpoint {}: api key {}", name, source);
            }
            Ok(())
        }

        Commands::Endpoints { config } => {
            let cfg = load_config(&config)?;

            if cfg.endpoints.is_empty() {
                println!("No endpoints configured");
                return Ok(());
            }

            println!("{:<32} {:<6} {:<6} URL", "NAME", "ENGINE", "AUTH");
            for endpoint in &cfg.endpoints {
                println!(
                    "{:<32} {:<6} {:<6} {}",
                    endpoint.name,
                    endpoint.engine.as_str(),
                    if endpoint.api_key.is_some() { "yes" } else { "no" },
                    endpoint.url
                );
            }
            Ok(())
        }

        Commands::Probe {
            url,
            timeout,
            attempts,
        } => {
            let transport = HttpTransport::with_connect_timeout(Duration::from_secs(timeout))?;
            let prober = HealthProber::new(
                ResilientClient::new(transport),
                HealthConfig {
                    timeout: Duration::from_secs(timeout),
                    max_attempts: attempts,
                },
            );

            let status = prober.check_health(&url).await;
            println!("{} {}", url, status);
            Ok(())
        }
    }
}
