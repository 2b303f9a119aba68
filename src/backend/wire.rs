//! Newline-delimited JSON event codec used by the HTTP pipeline.
//!
//! Each line is one tagged object:
//!
//! ```text
//! {"type":"audio","data":"<base64 pcm16le>"}
//! {"type":"lifecycle","event":"done"}
//! {"type":"error","message":"..."}
//! ```

use crate::backend::{ResponseEvent, ResponseStream};
use crate::error::{Result, TalkbackError};
use base64::Engine;
use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;

/// Events as they appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Response audio, base64 encoded
    Audio { data: String },
    /// Informational marker
    Lifecycle { event: String },
    /// Backend-side failure for this turn
    Error { message: String },
}

impl WireEvent {
    /// Serialize to one NDJSON line (without the newline).
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wrap raw PCM bytes.
    pub fn audio(bytes: &[u8]) -> Self {
        WireEvent::Audio {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Convert to a response event. An `error` line fails the turn.
    pub fn into_event(self) -> Result<ResponseEvent> {
        match self {
            WireEvent::Audio { data } => base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .map(ResponseEvent::AudioChunk)
                .map_err(|e| TalkbackError::BackendProtocol {
                    message: format!("invalid base64 audio: {e}"),
                }),
            WireEvent::Lifecycle { event } => Ok(ResponseEvent::Lifecycle(event)),
            WireEvent::Error { message } => Err(TalkbackError::transmission(message)),
        }
    }
}

/// Incremental NDJSON decoder for a chunked response body.
///
/// Body chunks split lines at arbitrary byte positions; bytes after the last
/// newline are kept until the next `push` or `finish`.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return every line completed by it, in order.
    ///
    /// A malformed line yields a protocol error and an `error` line yields a
    /// transmission error; decoding stops after the first failure.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ResponseEvent>> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            match decode_line(&line[..line.len() - 1]) {
                Ok(Some(event)) => events.push(Ok(event)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.clear();
                    events.push(Err(e));
                    break;
                }
            }
        }
        events
    }

    /// Decode a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Option<ResponseEvent>> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

struct BodyState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: NdjsonDecoder,
    ready: VecDeque<Result<ResponseEvent>>,
    done: bool,
}

/// Turn a chunked NDJSON response body into a response stream.
///
/// The stream ends after the first error it yields.
pub fn decode_ndjson_stream<S, B, E>(body: S) -> ResponseStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = BodyState {
        body: Box::pin(body),
        decoder: NdjsonDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                if item.is_err() {
                    st.ready.clear();
                    st.done = true;
                }
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let decoded = st.decoder.push(chunk.as_ref());
                    st.ready.extend(decoded);
                }
                Some(Err(e)) => {
                    st.done = true;
                    let error = TalkbackError::transmission(format!("response body failed: {e}"));
                    return Some((Err(error), st));
                }
                None => {
                    st.done = true;
                    if let Some(last) = st.decoder.finish().transpose() {
                        st.ready.push_back(last);
                    }
                }
            }
        }
    }))
}

fn decode_line(line: &[u8]) -> Result<Option<ResponseEvent>> {
    let text = std::str::from_utf8(line).map_err(|e| TalkbackError::BackendProtocol {
        message: format!("response line is not UTF-8: {e}"),
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let wire = WireEvent::from_json(text).map_err(|e| TalkbackError::BackendProtocol {
        message: format!("malformed event '{text}': {e}"),
    })?;
    wire.into_event().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_json_shape() {
        let json = WireEvent::Lifecycle {
            event: "done".to_string(),
        }
        .to_json()
        .expect("should serialize");
        assert_eq!(json, r#"{"type":"lifecycle","event":"done"}"#);
    }

    #[test]
    fn test_audio_decodes_base64() {
        let event = WireEvent::audio(&[1, 2, 3, 4]).into_event().unwrap();
        assert_eq!(event, ResponseEvent::audio(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_invalid_base64_is_protocol_error() {
        let err = WireEvent::Audio {
            data: "not base64!".to_string(),
        }
        .into_event()
        .unwrap_err();
        assert!(matches!(err, TalkbackError::BackendProtocol { .. }));
    }

    #[test]
    fn test_error_line_fails_the_turn() {
        let mut decoder = NdjsonDecoder::new();
        let mut events = decoder
            .push(b"{\"type\":\"lifecycle\",\"event\":\"a\"}\n{\"type\":\"error\",\"message\":\"model overloaded\"}\n");
        let err = events.pop().unwrap().unwrap_err();
        assert_eq!(events.pop().unwrap().unwrap(), ResponseEvent::lifecycle("a"));
        assert!(err.is_turn_scoped());
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        let line = format!(
            "{}\n{}\n",
            WireEvent::audio(&[9, 9]).to_json().unwrap(),
            r#"{"type":"lifecycle","event":"done"}"#
        );
        let (a, b) = line.as_bytes().split_at(7);

        assert!(decoder.push(a).is_empty());
        let events: Vec<ResponseEvent> = decoder.push(b).into_iter().map(|e| e.unwrap()).collect();

        assert_eq!(
            events,
            vec![
                ResponseEvent::audio(vec![9, 9]),
                ResponseEvent::lifecycle("done"),
            ]
        );
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut decoder = NdjsonDecoder::new();
        let events = decoder.push(b"\n\r\n{\"type\":\"lifecycle\",\"event\":\"a\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &ResponseEvent::lifecycle("a"));
    }

    #[test]
    fn test_finish_decodes_unterminated_last_line() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"type":"lifecycle","event":"done"}"#).is_empty());
        assert_eq!(
            decoder.finish().unwrap(),
            Some(ResponseEvent::lifecycle("done"))
        );
    }

    #[test]
    fn test_malformed_line_is_protocol_error() {
        let mut decoder = NdjsonDecoder::new();
        let mut events = decoder.push(b"{\"type\":\"video\"}\n");
        let err = events.pop().unwrap().unwrap_err();
        assert!(matches!(err, TalkbackError::BackendProtocol { .. }));
    }

    #[tokio::test]
    async fn test_body_stream_yields_events_in_order() {
        let body = stream::iter(vec![
            Ok::<_, String>(b"{\"type\":\"lifecycle\",\"event\":\"turn_started\"}\n{\"type\":\"au".to_vec()),
            Ok(format!("dio\",\"data\":\"AQI=\"}}\n{}", r#"{"type":"lifecycle","event":"done"}"#).into_bytes()),
        ]);

        let events: Vec<ResponseEvent> = decode_ndjson_stream(body)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ResponseEvent::lifecycle("turn_started"),
                ResponseEvent::audio(vec![1, 2]),
                ResponseEvent::lifecycle("done"),
            ]
        );
    }

    #[tokio::test]
    async fn test_body_stream_stops_after_transport_error() {
        let body = stream::iter(vec![
            Ok(b"{\"type\":\"lifecycle\",\"event\":\"a\"}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"{\"type\":\"lifecycle\",\"event\":\"b\"}\n".to_vec()),
        ]);

        let events: Vec<Result<ResponseEvent>> = decode_ndjson_stream(body).collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].as_ref().unwrap_err().is_turn_scoped());
    }
}
