//! Relaying upstream chunks to the caller as SSE frames.
//!
//! Each upstream chunk is stamped with the requested model name and, if the
//! engine left it out, a response id that stays the same for the whole
//! session. Frames go out as `data: <json>\n\n`. A clean upstream end emits
//! exactly one `data: [DONE]\n\n`; an upstream error ends the stream without
//! it. The session owns the request's [`InferenceTimer`], so the metric is
//! recorded once whichever way the session ends, including the caller
//! disconnecting (the frame stream is dropped).

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::backend::ChunkStream;
use crate::metrics::{InferenceTimer, Outcome};
use crate::proxy::types::InferenceObject;

/// Stream terminator sent after the last chunk.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Encode one SSE data frame.
pub fn encode_frame<T: Serialize>(chunk: &T) -> Result<Bytes, serde_json::Error> {
    let mut frame = Vec::with_capacity(256);
    frame.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut frame, chunk)?;
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// State of one streaming response.
pub struct StreamSession {
    upstream: ChunkStream,
    model: String,
    response_id: Option<String>,
    timer: Option<InferenceTimer>,
}

impl StreamSession {
    pub fn new(upstream: ChunkStream, model: String, timer: InferenceTimer) -> Self {
        Self {
            upstream,
            model,
            response_id: None,
            timer: Some(timer),
        }
    }

    fn stamp(&mut self, chunk: &mut InferenceObject) {
        if chunk.id.is_empty() {
            chunk.id = self
                .response_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
        }
        chunk.model.clone_from(&self.model);
    }

    fn finish(&mut self, outcome: Outcome) {
        if let Some(timer) = self.timer.take() {
            timer.finish(outcome);
        }
    }

    /// Next frame to write, or `None` once the session is over.
    async fn next_frame(&mut self) -> Option<Bytes> {
        if self.timer.is_none() {
            return None;
        }

        match self.upstream.next().await {
            None => {
                tracing::debug!(model = %self.model, "Inference stream completed");
                self.finish(Outcome::Success);
                Some(Bytes::from_static(DONE_FRAME))
            }
            Some(Err(e)) => {
                tracing::warn!(model = %self.model, error = %e, "Inference stream failed");
                self.finish(Outcome::Failure);
                None
            }
            Some(Ok(mut chunk)) => {
                self.stamp(&mut chunk);
                match encode_frame(&chunk) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        tracing::warn!(model = %self.model, error = %e, "Failed to encode stream chunk");
                        self.finish(Outcome::Failure);
                        None
                    }
                }
            }
        }
    }

    pub fn into_frames(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::unfold(self, |mut session| async move {
            session.next_frame().await.map(|frame| (Ok(frame), session))
        })
    }
}

/// Turn an upstream chunk stream into the caller-facing frame stream.
pub fn relay(
    upstream: ChunkStream,
    model: String,
    timer: InferenceTimer,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    StreamSession::new(upstream, model, timer).into_frames()
}
