//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::server::AppState;
use super::stream::relay;
use super::types::{ChatCompletionRequest, CompletionRequest, InferenceRequest};
use super::validate::ValidatedInference;
use crate::client::HealthStatus;
use crate::config::validate_endpoint_name;
use crate::error::Error;
use crate::metrics::Outcome;

/// Wrap `data` in the control-plane success envelope.
fn success<T: Serialize>(msg: &str, data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "success",
        "msg": msg,
        "data": data,
    }))
}

/// Handle POST /v1/completions
pub async fn completions(
    State(state): State<AppState>,
    inference: ValidatedInference<CompletionRequest>,
) -> Result<Response, Error> {
    serve_inference(&state, inference).await
}

/// Handle POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    inference: ValidatedInference<ChatCompletionRequest>,
) -> Result<Response, Error> {
    serve_inference(&state, inference).await
}

async fn serve_inference<R: InferenceRequest>(
    state: &AppState,
    inference: ValidatedInference<R>,
) -> Result<Response, Error> {
    let ValidatedInference {
        request,
        endpoint,
        timer,
    } = inference;

    tracing::info!(
        model = %request.model(),
        engine = %endpoint.engine,
        stream = request.is_streaming(),
        "Received {} request",
        R::KIND.label()
    );

    if !request.is_streaming() {
        return match request.dispatch(state.backend.as_ref(), &endpoint).await {
            Ok(mut response) => {
                if response.id.is_empty() {
                    response.id = Uuid::new_v4().to_string();
                }
                response.model = request.model().to_string();
                timer.finish(Outcome::Success);
                Ok(Json(response).into_response())
            }
            Err(err) => {
                tracing::error!(
                    model = %request.model(),
                    endpoint = %endpoint.name,
                    error = %err,
                    "{} request failed",
                    R::KIND.label()
                );
                timer.finish(Outcome::Failure);
                Err(err.into())
            }
        };
    }

    let upstream = match request.open_stream(state.backend.as_ref(), &endpoint).await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::error!(
                model = %request.model(),
                endpoint = %endpoint.name,
                error = %err,
                "Failed to open {} stream",
                R::KIND.label()
            );
            timer.finish(Outcome::Failure);
            return Err(err.into());
        }
    };

    let frames = relay(upstream, request.model().to_string(), timer);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| Error::Internal(format!("Failed to build stream response: {}", e)))
}

/// Handle GET /v1/models - one model per configured endpoint
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<serde_json::Value> = state
        .endpoints
        .endpoints()
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.name,
                "object": "model",
                "owned_by": e.engine.as_str(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "infergate"
    }))
}

#[derive(Debug, Serialize)]
struct EndpointHealth<'a> {
    name: &'a str,
    engine: &'a str,
    status: HealthStatus,
}

/// Handle GET /v1/endpoints/:name/health
pub async fn endpoint_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let endpoint = state
        .endpoints
        .get(&name)
        .ok_or_else(|| Error::NotFound(format!("Endpoint '{}' not found", name)))?;

    let status = state.prober.check_health(&endpoint.liveness_url()).await;
    tracing::info!(endpoint = %endpoint.name, status = %status, "Checked endpoint health");

    Ok(success(
        "Endpoint health checked",
        EndpointHealth {
            name: &endpoint.name,
            engine: endpoint.engine.as_str(),
            status,
        },
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
    #[serde(default)]
    pub endpoint_name: Option<String>,
}

/// Handle POST /v1/endpoints/validate?endpoint_name=...
pub async fn validate_endpoint(
    State(state): State<AppState>,
    Query(params): Query<ValidateParams>,
) -> Result<Json<serde_json::Value>, Error> {
    let name = params
        .endpoint_name
        .ok_or_else(|| Error::Validation("endpoint_name query parameter is required".into()))?;

    validate_endpoint_name(&name).map_err(Error::Validation)?;

    if state.endpoints.get(&name).is_some() {
        return Err(Error::Validation(format!(
            "Endpoint with name '{}' already exists",
            name
        )));
    }

    Ok(success(
        "Endpoint name validated successfully",
        serde_json::Value::Null,
    ))
}

/// Handle GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
