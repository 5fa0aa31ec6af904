//! Backend for engines speaking the OpenAI completions API (vLLM, TGI, NIM).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

use super::sse::decode_chunks;
use super::{BackendError, ChunkStream, InferenceBackend};
use crate::client::{
    ClientError, HttpTransport, RequestDescriptor, ResilientClient, RetryPolicy, TransportError,
};
use crate::endpoint::Endpoint;
use crate::proxy::types::{
    ChatCompletionRequest, CompletionRequest, InferenceKind, InferenceObject,
};

/// Sends OpenAI-compatible requests to an endpoint's base URL.
///
/// Unary calls go through the [`ResilientClient`] and are retried per the
/// configured policy. Streaming calls are opened once: a stream that failed
/// half-way cannot be replayed to the caller.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: ResilientClient<HttpTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(
        client: ResilientClient<HttpTransport>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            request_timeout,
        }
    }

    fn descriptor<R: Serialize>(
        &self,
        kind: InferenceKind,
        request: &R,
        endpoint: &Endpoint,
        streaming: bool,
    ) -> Result<RequestDescriptor, BackendError> {
        let body = serde_json::to_vec(request)?;

        let mut desc = RequestDescriptor::post(&endpoint.url_for(kind.path()))?
            .with_body(body)
            .with_header("content-type", "application/json")?
            .with_retry(self.retry)
            .with_timeout(self.request_timeout);

        if let Some(key) = &endpoint.api_key {
            desc = desc.with_header("authorization", &format!("Bearer {}", key.expose_secret()))?;
        }
        if streaming {
            desc = desc.with_header("accept", "text/event-stream")?;
        }

        Ok(desc)
    }

    async fn unary<R: Serialize>(
        &self,
        kind: InferenceKind,
        request: &R,
        endpoint: &Endpoint,
    ) -> Result<InferenceObject, BackendError> {
        let desc = self.descriptor(kind, request, endpoint, false)?;

        tracing::debug!(
            endpoint = %endpoint.name,
            url = %desc.url(),
            "Sending {} request",
            kind.label()
        );

        let response = self.client.execute(&desc).await?;
        serde_json::from_slice(&response.body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn stream<R: Serialize>(
        &self,
        kind: InferenceKind,
        request: &R,
        endpoint: &Endpoint,
    ) -> Result<ChunkStream, BackendError> {
        let desc = self.descriptor(kind, request, endpoint, true)?;

        tracing::debug!(
            endpoint = %endpoint.name,
            url = %desc.url(),
            "Opening {} stream",
            kind.label()
        );

        // The deadline covers connect and response headers only; a healthy
        // stream may run far longer.
        let send = self
            .client
            .transport()
            .http_client()
            .request(desc.method().clone(), desc.url().clone())
            .headers(desc.headers().clone())
            .body(desc.body().clone())
            .send();

        let response = match tokio::time::timeout(desc.timeout(), send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ClientError::Transport(TransportError::from(e)).into()),
            Err(_) => {
                return Err(
                    ClientError::Transport(TransportError::timeout(desc.timeout())).into(),
                )
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(
                endpoint = %endpoint.name,
                status = %status,
                "Inference engine refused stream"
            );
            return Err(ClientError::NonSuccessStatus { status }.into());
        }

        Ok(decode_chunks(response.bytes_stream()))
    }
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    async fn completion(
        &self,
        request: &CompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<InferenceObject, BackendError> {
        self.unary(InferenceKind::Completion, request, endpoint).await
    }

    async fn completion_stream(
        &self,
        request: &CompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<ChunkStream, BackendError> {
        self.stream(InferenceKind::Completion, request, endpoint)
            .await
    }

    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<InferenceObject, BackendError> {
        self.unary(InferenceKind::ChatCompletion, request, endpoint)
            .await
    }

    async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<ChunkStream, BackendError> {
        self.stream(InferenceKind::ChatCompletion, request, endpoint)
            .await
    }
}
