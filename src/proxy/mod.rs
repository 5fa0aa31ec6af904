//! HTTP gateway module.
//!
//! Serves the OpenAI-compatible inference API and the control-plane
//! endpoints, forwarding inference to the endpoint named by the request's
//! model through an [`InferenceBackend`](crate::backend::InferenceBackend).

mod handlers;
mod server;
pub mod stream;
pub mod types;
mod validate;

pub use server::{create_router, run_server, AppState};
pub use stream::{encode_frame, relay, StreamSession, DONE_FRAME};
pub use types::{
    ChatCompletionRequest, CompletionRequest, InferenceKind, InferenceObject, InferenceRequest,
};
pub use validate::ValidatedInference;
