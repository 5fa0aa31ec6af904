//! OpenAI-compatible request and response types.
//!
//! Only the fields the gateway acts on are typed. Everything else is kept in
//! a flattened map and forwarded to the engine untouched.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::{BackendError, ChunkStream, InferenceBackend};
use crate::endpoint::Endpoint;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Read `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of `POST /v1/completions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A completion response or stream chunk.
///
/// `id` and `model` are rewritten by the gateway before the object reaches
/// the caller; the rest is relayed as the engine produced it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InferenceObject {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// The two inference operations the gateway exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceKind {
    Completion,
    ChatCompletion,
}

impl InferenceKind {
    /// Path on the engine, relative to the endpoint base URL.
    pub fn path(&self) -> &'static str {
        match self {
            InferenceKind::Completion => "/v1/completions",
            InferenceKind::ChatCompletion => "/v1/chat/completions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InferenceKind::Completion => "Completions",
            InferenceKind::ChatCompletion => "Chat completions",
        }
    }
}

/// Behaviour shared by the typed inference request bodies.
pub trait InferenceRequest: DeserializeOwned + Serialize + Send + Sync + 'static {
    const KIND: InferenceKind;

    fn model(&self) -> &str;

    fn is_streaming(&self) -> bool;

    /// Run the request as a single unary call.
    fn dispatch<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<InferenceObject, BackendError>>;

    /// Open the upstream chunk stream.
    fn open_stream<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<ChunkStream, BackendError>>;
}

impl InferenceRequest for CompletionRequest {
    const KIND: InferenceKind = InferenceKind::Completion;

    fn model(&self) -> &str {
        &self.model
    }

    fn is_streaming(&self) -> bool {
        self.stream
    }

    fn dispatch<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<InferenceObject, BackendError>> {
        backend.completion(self, endpoint)
    }

    fn open_stream<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<ChunkStream, BackendError>> {
        backend.completion_stream(self, endpoint)
    }
}

impl InferenceRequest for ChatCompletionRequest {
    const KIND: InferenceKind = InferenceKind::ChatCompletion;

    fn model(&self) -> &str {
        &self.model
    }

    fn is_streaming(&self) -> bool {
        self.stream
    }

    fn dispatch<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<InferenceObject, BackendError>> {
        backend.chat_completion(self, endpoint)
    }

    fn open_stream<'a>(
        &'a self,
        backend: &'a dyn InferenceBackend,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<ChunkStream, BackendError>> {
        backend.chat_completion_stream(self, endpoint)
    }
}
