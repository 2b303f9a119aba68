//! Conversational processing pipelines.
//!
//! A pipeline turns user audio into an ordered sequence of [`ResponseEvent`]s.
//! Batch turns hand over one finished [`AudioBuffer`]; streaming turns hand
//! over a [`LiveFrames`] receiver that is fed while recording is active and
//! closed when it ends.

pub mod echo;
#[cfg(feature = "http-backend")]
pub mod http;
pub mod scripted;
pub mod wire;

use crate::audio::frame::{AudioBuffer, AudioFrame};
use crate::error::{Result, TalkbackError};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

pub use echo::EchoPipeline;
#[cfg(feature = "http-backend")]
pub use http::HttpPipeline;
pub use scripted::ScriptedPipeline;

/// One event emitted by a pipeline, consumed in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Raw 16-bit little-endian mono PCM for the output device.
    AudioChunk(Vec<u8>),
    /// Informational marker such as "turn_started" or "done".
    Lifecycle(String),
}

impl ResponseEvent {
    pub fn audio(data: impl Into<Vec<u8>>) -> Self {
        ResponseEvent::AudioChunk(data.into())
    }

    pub fn lifecycle(marker: impl Into<String>) -> Self {
        ResponseEvent::Lifecycle(marker.into())
    }
}

/// Ordered response events for one turn (batch) or one live stream.
pub type ResponseStream = BoxStream<'static, Result<ResponseEvent>>;

/// Which pipeline implementation to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Offline loopback that plays the user's audio back.
    #[default]
    Echo,
    /// Remote pipeline over HTTP.
    Http,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Echo => write!(f, "echo"),
            BackendKind::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = TalkbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(BackendKind::Echo),
            "http" => Ok(BackendKind::Http),
            other => Err(TalkbackError::ConfigInvalidValue {
                key: "backend.kind".to_string(),
                message: format!("unknown backend '{other}' (expected echo or http)"),
            }),
        }
    }
}

/// Producer side of a live stream, held by the recording gate.
///
/// Pushing never blocks: a stream may be queued behind a turn that is still
/// playing, and the frames recorded meanwhile must not be lost.
#[derive(Debug)]
pub struct LiveInput {
    tx: Option<mpsc::UnboundedSender<AudioFrame>>,
    closed: watch::Sender<bool>,
    pushed: usize,
}

/// Consumer side of a live stream, handed to the pipeline.
#[derive(Debug)]
pub struct LiveFrames {
    rx: mpsc::UnboundedReceiver<AudioFrame>,
    closed: InputClosed,
    sample_rate: u32,
    channels: u16,
}

/// Observes whether the producer side of a live stream has finished.
#[derive(Debug, Clone)]
pub struct InputClosed {
    rx: watch::Receiver<bool>,
}

impl InputClosed {
    /// True after `close` or once the [`LiveInput`] was dropped.
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the input is closed.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|closed| *closed).await.is_err() {
            // LiveInput dropped without an explicit close.
        }
    }
}

impl LiveInput {
    /// Create a connected input/frames pair for one stream.
    pub fn channel(sample_rate: u32, channels: u16) -> (LiveInput, LiveFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);
        (
            LiveInput {
                tx: Some(tx),
                closed,
                pushed: 0,
            },
            LiveFrames {
                rx,
                closed: InputClosed { rx: closed_rx },
                sample_rate,
                channels,
            },
        )
    }

    /// Forward one frame to the pipeline.
    ///
    /// # Errors
    /// Fails after `close` or once the pipeline has dropped its receiver.
    pub fn push(&mut self, frame: AudioFrame) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TalkbackError::transmission("live stream is closed"))?;
        tx.send(frame)
            .map_err(|_| TalkbackError::transmission("pipeline stopped reading the live stream"))?;
        self.pushed += 1;
        Ok(())
    }

    /// Signal end of input. The pipeline keeps emitting events for what it
    /// already received. Idempotent.
    pub fn close(&mut self) {
        self.tx = None;
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Frames pushed so far.
    pub fn pushed(&self) -> usize {
        self.pushed
    }
}

impl LiveFrames {
    /// Next frame, or `None` once the input side is closed and drained.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Handle for observing when the recording side closes the stream.
    pub fn input_closed(&self) -> InputClosed {
        self.closed.clone()
    }

    /// Adapt into a `Stream` of frames.
    pub fn into_stream(self) -> BoxStream<'static, AudioFrame> {
        Box::pin(futures_util::stream::unfold(self, |mut frames| async move {
            frames.recv().await.map(|frame| (frame, frames))
        }))
    }
}

/// The external conversational pipeline.
///
/// This trait allows swapping implementations (remote service vs loopback vs scripted double).
#[async_trait::async_trait]
pub trait ConversationPipeline: Send + Sync {
    /// Submit one finished turn and get its response events.
    async fn submit(&self, audio: AudioBuffer) -> Result<ResponseStream>;

    /// Start a live stream fed by `frames`. Events arrive until the pipeline
    /// has answered everything pushed before the input was closed.
    async fn open_stream(&self, frames: LiveFrames) -> Result<ResponseStream>;

    /// Name for logging.
    fn name(&self) -> &str;
}
