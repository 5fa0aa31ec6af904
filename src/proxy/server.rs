//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::backend::{InferenceBackend, OpenAiBackend};
use crate::client::{HealthProber, HttpTransport, ResilientClient};
use crate::config::Config;
use crate::endpoint::EndpointRegistry;
use crate::metrics::InferenceMetrics;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub endpoints: Arc<EndpointRegistry>,
    pub backend: Arc<dyn InferenceBackend>,
    pub prober: Arc<HealthProber<HttpTransport>>,
    pub metrics: Arc<InferenceMetrics>,
}

impl AppState {
    /// Wire up the production backend, prober and registry from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::with_connect_timeout(config.client.connect_timeout())?;
        let client = ResilientClient::new(transport);

        let backend = OpenAiBackend::new(
            client.clone(),
            config.client.retry_policy(),
            config.client.request_timeout(),
        );
        let prober = HealthProber::new(client, config.health.to_health_config());

        Ok(Self {
            endpoints: Arc::new(EndpointRegistry::new(&config.endpoints)),
            backend: Arc::new(backend),
            prober: Arc::new(prober),
            metrics: Arc::new(InferenceMetrics::new()),
        })
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        // Control-plane endpoints
        .route("/v1/endpoints/validate", post(handlers::validate_endpoint))
        .route("/v1/endpoints/:name/health", get(handlers::endpoint_health))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::from_config(&config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting infergate server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
