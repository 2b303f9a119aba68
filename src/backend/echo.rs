//! Offline loopback pipeline.
//!
//! Plays the user's own audio back, framed by the same lifecycle markers a
//! real backend sends. Useful for checking devices without a server.

use crate::audio::frame::{AudioBuffer, pcm16_to_bytes};
use crate::backend::{ConversationPipeline, LiveFrames, ResponseEvent, ResponseStream};
use crate::defaults::ECHO_CHUNK_BYTES;
use crate::error::Result;
use futures_util::StreamExt;
use futures_util::stream;

pub const TURN_STARTED: &str = "turn_started";
pub const TURN_ENDED: &str = "turn_ended";

#[derive(Debug, Clone)]
pub struct EchoPipeline {
    chunk_bytes: usize,
}

impl Default for EchoPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoPipeline {
    pub fn new() -> Self {
        Self {
            chunk_bytes: ECHO_CHUNK_BYTES,
        }
    }

    /// Override the response chunk size. Rounded up to a whole sample.
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(2).next_multiple_of(2);
        self
    }
}

#[async_trait::async_trait]
impl ConversationPipeline for EchoPipeline {
    async fn submit(&self, audio: AudioBuffer) -> Result<ResponseStream> {
        let bytes = pcm16_to_bytes(&audio.samples().to_i16());
        tracing::debug!(samples = audio.len(), "echo turn");

        let mut events = vec![Ok(ResponseEvent::lifecycle(TURN_STARTED))];
        events.extend(
            bytes
                .chunks(self.chunk_bytes)
                .map(|chunk| Ok(ResponseEvent::audio(chunk))),
        );
        events.push(Ok(ResponseEvent::lifecycle(TURN_ENDED)));
        Ok(Box::pin(stream::iter(events)))
    }

    async fn open_stream(&self, frames: LiveFrames) -> Result<ResponseStream> {
        let echoed = frames.into_stream().map(|frame| {
            Ok(ResponseEvent::AudioChunk(pcm16_to_bytes(
                &frame.samples().to_i16(),
            )))
        });
        let events = stream::once(async { Ok(ResponseEvent::lifecycle(TURN_STARTED)) })
            .chain(echoed)
            .chain(stream::once(async {
                Ok(ResponseEvent::lifecycle(TURN_ENDED))
            }));
        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{AudioFrame, SampleEncoding, Samples};
    use crate::backend::LiveInput;

    async fn collect(stream: ResponseStream) -> Vec<ResponseEvent> {
        stream.map(|e| e.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_submit_echoes_audio_between_markers() {
        let frame = AudioFrame::new(Samples::I16(vec![1, 2, 3]), 24000, 1);
        let buffer = AudioBuffer::concat(&[frame], SampleEncoding::I16, 24000, 1);
        let pipeline = EchoPipeline::new().with_chunk_bytes(4);

        let events = collect(pipeline.submit(buffer).await.unwrap()).await;

        assert_eq!(
            events,
            vec![
                ResponseEvent::lifecycle(TURN_STARTED),
                ResponseEvent::audio(vec![1, 0, 2, 0]),
                ResponseEvent::audio(vec![3, 0]),
                ResponseEvent::lifecycle(TURN_ENDED),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_turn_still_gets_markers() {
        let pipeline = EchoPipeline::new();
        let events = collect(
            pipeline
                .submit(AudioBuffer::empty(SampleEncoding::F32, 24000, 1))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            events,
            vec![
                ResponseEvent::lifecycle(TURN_STARTED),
                ResponseEvent::lifecycle(TURN_ENDED),
            ]
        );
    }

    #[test]
    fn test_chunk_size_rounds_to_whole_samples() {
        assert_eq!(EchoPipeline::new().with_chunk_bytes(5).chunk_bytes, 6);
        assert_eq!(EchoPipeline::new().with_chunk_bytes(0).chunk_bytes, 2);
    }

    #[tokio::test]
    async fn test_stream_ends_after_input_closes() {
        let (mut input, frames) = LiveInput::channel(24000, 1);
        let stream = EchoPipeline::new().open_stream(frames).await.unwrap();

        input
            .push(AudioFrame::new(Samples::I16(vec![256]), 24000, 1))
            .unwrap();
        input.close();

        let events = collect(stream).await;
        assert_eq!(
            events,
            vec![
                ResponseEvent::lifecycle(TURN_STARTED),
                ResponseEvent::audio(vec![0, 1]),
                ResponseEvent::lifecycle(TURN_ENDED),
            ]
        );
    }
}
