//! Inference engine backends.
//!
//! An [`InferenceBackend`] runs completions against a resolved [`Endpoint`].
//! Unary calls return one [`InferenceObject`]; streaming calls return a
//! [`ChunkStream`] that yields decoded chunks until the engine signals the
//! end of the stream.

mod openai;
pub(crate) mod sse;

pub use openai::OpenAiBackend;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::stream::BoxStream;

use crate::client::ClientError;
use crate::endpoint::Endpoint;
use crate::proxy::types::{ChatCompletionRequest, CompletionRequest, InferenceObject};

/// Decoded upstream chunks. Ends cleanly when the engine finishes, or with
/// one `Err` item when the stream breaks.
pub type ChunkStream = BoxStream<'static, Result<InferenceObject, BackendError>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to encode inference request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid response from inference engine: {0}")]
    Decode(String),

    #[error("Inference stream interrupted: {0}")]
    Stream(String),
}

impl BackendError {
    /// HTTP status a caller should see for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BackendError::Client(ClientError::RequestConstruction(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BackendError::Client(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            BackendError::Client(_) => StatusCode::BAD_GATEWAY,
            BackendError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BackendError::Decode(_) | BackendError::Stream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Runs inference against an engine endpoint.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn completion(
        &self,
        request: &CompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<InferenceObject, BackendError>;

    async fn completion_stream(
        &self,
        request: &CompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<ChunkStream, BackendError>;

    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<InferenceObject, BackendError>;

    async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
        endpoint: &Endpoint,
    ) -> Result<ChunkStream, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransportError;

    #[test]
    fn test_timeouts_map_to_gateway_timeout() {
        let err = BackendError::Client(ClientError::Transport(TransportError::timeout(
            std::time::Duration::from_secs(1),
        )));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_upstream_status_maps_to_bad_gateway() {
        let err = BackendError::Client(ClientError::NonSuccessStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_construction_failure_is_internal() {
        let err = BackendError::Client(ClientError::RequestConstruction("bad url".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
