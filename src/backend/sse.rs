//! Incremental decoding of OpenAI-style SSE streams.
//!
//! [`SseDecoder`] reassembles lines across arbitrary chunk boundaries and
//! yields the payload of each `data:` line. `data: [DONE]` ends the stream;
//! anything after it is ignored. A line longer than 64 KiB ends it as well,
//! with an error. [`decode_chunks`] wraps a raw byte stream
//! into a [`ChunkStream`] of parsed objects.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;

use super::{BackendError, ChunkStream};
use crate::proxy::types::InferenceObject;

/// Maximum bytes held while waiting for a line terminator.
const MAX_LINE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Data(String),
    Done,
    /// A line grew past [`MAX_LINE_BUFFER`] without a terminator.
    Overflow(usize),
}

pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning the events completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line, &mut events);
            if self.done {
                self.buffer.clear();
                return events;
            }
        }

        if self.buffer.len() > MAX_LINE_BUFFER {
            let buffered = self.buffer.len();
            tracing::warn!(buffered, "SSE line exceeds buffer limit, abandoning stream");
            self.buffer.clear();
            self.done = true;
            events.push(SseEvent::Overflow(buffered));
        }

        events
    }

    /// Treat whatever is left as a final unterminated line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        events
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        // event:, id:, retry: and comment lines carry nothing we relay.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data == "[DONE]" {
            self.done = true;
            events.push(SseEvent::Done);
        } else if !data.is_empty() {
            events.push(SseEvent::Data(data.to_string()));
        }
    }
}

struct DecodeState<S> {
    upstream: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<InferenceObject, BackendError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Data(payload) => {
                    let item = serde_json::from_str::<InferenceObject>(&payload)
                        .map_err(|e| BackendError::Decode(e.to_string()));
                    let failed = item.is_err();
                    self.pending.push_back(item);
                    if failed {
                        self.finished = true;
                        return;
                    }
                }
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Overflow(buffered) => {
                    self.pending.push_back(Err(BackendError::Decode(format!(
                        "SSE line exceeds {} bytes ({} buffered)",
                        MAX_LINE_BUFFER, buffered
                    ))));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Decode an SSE byte stream into inference chunks.
///
/// The returned stream ends after `[DONE]` (or upstream EOF) and yields a
/// single error item, then ends, when the body breaks, a line overruns the
/// buffer, or a chunk is not valid JSON.
pub(crate) fn decode_chunks<S, E>(upstream: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display,
{
    let state = DecodeState {
        upstream,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    st.enqueue(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(BackendError::Stream(e.to_string())));
                }
                None => {
                    let events = st.decoder.finish();
                    st.enqueue(events);
                    if !st.decoder.is_done() {
                        tracing::debug!("Upstream closed without [DONE]");
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Join events with the SSE delimiter and cut the bytes at `splits`.
    fn split_sse(events: &[&str], splits: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in splits {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn decode_all(chunks: &[Vec<u8>]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_single_chunk() {
        let chunks = split_sse(
            &[
                r#"data: {"id":"cmpl-1","choices":[{"text":"Hel"}]}"#,
                r#"data: {"id":"cmpl-1","choices":[{"text":"lo"}]}"#,
                "data: [DONE]",
            ],
            &[],
        );

        let events = decode_all(&chunks);

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            SseEvent::Data(r#"{"id":"cmpl-1","choices":[{"text":"Hel"}]}"#.into())
        );
        assert_eq!(events[2], SseEvent::Done);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let chunks = split_sse(
            &[
                r#"data: {"id":"cmpl-1","choices":[{"text":"a fairly long piece"}]}"#,
                "data: [DONE]",
            ],
            &[3, 17, 40, 70],
        );
        assert!(chunks.len() > 2);

        let events = decode_all(&chunks);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SseEvent::Data(d) if d.contains("a fairly long piece")));
        assert_eq!(events[1], SseEvent::Done);
    }

    #[test]
    fn test_non_data_fields_skipped() {
        let raw = b"event: message\nid: 7\nretry: 5000\n: keep-alive\ndata: {\"id\":\"x\"}\n\ndata: [DONE]\n\n";

        let events = decode_all(&[raw.to_vec()]);

        assert_eq!(
            events,
            vec![SseEvent::Data("{\"id\":\"x\"}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn test_crlf_and_missing_space() {
        let raw = b"data:{\"id\":\"x\"}\r\n\r\ndata: [DONE]\r\n\r\n";

        let events = decode_all(&[raw.to_vec()]);

        assert_eq!(
            events,
            vec![SseEvent::Data("{\"id\":\"x\"}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn test_done_without_trailing_newline() {
        let events = decode_all(&[b"data: {\"id\":\"x\"}\n\ndata: [DONE]".to_vec()]);
        assert_eq!(events.last(), Some(&SseEvent::Done));
    }

    #[test]
    fn test_events_after_done_ignored() {
        let events = decode_all(&[b"data: [DONE]\n\ndata: {\"id\":\"late\"}\n\n".to_vec()]);
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_oversized_line_ends_decoding() {
        let mut decoder = SseDecoder::new();
        let huge = vec![b'x'; MAX_LINE_BUFFER + 1];

        assert_eq!(
            decoder.push(&huge),
            vec![SseEvent::Overflow(MAX_LINE_BUFFER + 1)]
        );
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: {\"id\":\"after\"}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    fn byte_stream(
        items: Vec<Result<&'static str, &'static str>>,
    ) -> impl Stream<Item = Result<Bytes, &'static str>> + Send + Unpin + 'static {
        futures::stream::iter(
            items
                .into_iter()
                .map(|item| item.map(|s| Bytes::from_static(s.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_decode_chunks_parses_until_done() {
        let stream = decode_chunks(byte_stream(vec![
            Ok("data: {\"id\":\"a\",\"choices\":[]}\n\n"),
            Ok("data: {\"choices\":[]}\n\ndata: [DONE]\n\n"),
            Ok("data: {\"id\":\"ignored\"}\n\n"),
        ]));

        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().id, "a");
        assert_eq!(items[1].as_ref().unwrap().id, "");
    }

    #[tokio::test]
    async fn test_decode_chunks_ends_on_eof_without_done() {
        let stream = decode_chunks(byte_stream(vec![Ok("data: {\"id\":\"a\"}\n\n")]));

        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn test_decode_chunks_surfaces_body_error_once() {
        let stream = decode_chunks(byte_stream(vec![
            Ok("data: {\"id\":\"a\"}\n\n"),
            Err("connection reset"),
            Ok("data: {\"id\":\"b\"}\n\n"),
        ]));

        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(BackendError::Stream(m)) if m == "connection reset"));
    }

    #[tokio::test]
    async fn test_decode_chunks_stops_on_invalid_json() {
        let stream = decode_chunks(byte_stream(vec![Ok(
            "data: {not json}\n\ndata: {\"id\":\"b\"}\n\n",
        )]));

        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(BackendError::Decode(_))));
    }

    #[tokio::test]
    async fn test_decode_chunks_fails_on_oversized_line() {
        let head = format!("data: {{\"id\":\"a\",\"text\":\"{}", "x".repeat(66 * 1024));
        let tail = format!("{}\"}}\n\n", "y".repeat(4 * 1024));
        let upstream = futures::stream::iter(vec![
            Ok::<_, &'static str>(Bytes::from(head)),
            Ok(Bytes::from(tail)),
            Ok(Bytes::from_static(b"data: {\"id\":\"b\"}\n\ndata: [DONE]\n\n")),
        ]);

        let items: Vec<_> = decode_chunks(upstream).collect().await;

        assert_eq!(items.len(), 1);
        assert!(
            matches!(&items[0], Err(BackendError::Decode(m)) if m.starts_with("SSE line exceeds 65536 bytes"))
        );
    }
}
