//! Error types for infergate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::backend::BackendError;

/// Result type alias for infergate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for infergate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The request body is missing or does not have the expected shape.
    #[error("{0}")]
    Binding(String),

    /// The addressed model, endpoint or engine is not known.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Binding(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Backend(err) => err.status_code(),
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind for the failure envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Binding(_) => "binding_error",
            Error::NotFound(_) => "not_found_error",
            Error::Validation(_) => "validation_error",
            Error::Backend(_) => "backend_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::info!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = serde_json::json!({
            "status": "failure",
            "msg": self.to_string(),
            "error": {
                "type": self.kind(),
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Binding("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("missing".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        let exhausted = Error::Backend(BackendError::Client(ClientError::RetryExhausted {
            attempts: 2,
            failures: vec![],
        }));
        assert_eq!(exhausted.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_failure_envelope_shape() {
        let response = Error::NotFound("No endpoint found for model 'x'".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["msg"], "No endpoint found for model 'x'");
        assert_eq!(json["error"]["type"], "not_found_error");
        assert_eq!(json["error"]["code"], 404);
    }
}
