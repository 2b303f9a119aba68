//! Transmission channel.
//!
//! A single worker takes finished turns (batch) or live streams (streaming)
//! from a bounded queue, one at a time. Response events are forwarded to the
//! playback sink in arrival order; the next turn starts only after the sink
//! acknowledged the end of the previous one, so the backend never sees two
//! turns at once.

use crate::audio::frame::AudioBuffer;
use crate::backend::{ConversationPipeline, InputClosed, LiveFrames, ResponseEvent, ResponseStream};
use crate::error::{Result, TalkbackError};
use crate::session::control::{ShutdownSignal, TurnId};
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub enum TurnPayload {
    Batch(AudioBuffer),
    Stream(LiveFrames),
}

/// Work item for the transmission channel.
#[derive(Debug)]
pub struct TurnRequest {
    pub turn: TurnId,
    pub payload: TurnPayload,
}

/// Reported back to the controller after each turn.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed { turn: TurnId, chunks: usize },
    Failed { turn: TurnId, error: TalkbackError },
}

impl TurnOutcome {
    pub fn turn(&self) -> TurnId {
        match self {
            TurnOutcome::Completed { turn, .. } | TurnOutcome::Failed { turn, .. } => *turn,
        }
    }
}

/// Messages from the transmission channel to the playback sink.
#[derive(Debug)]
pub enum PlaybackCommand {
    Event {
        turn: TurnId,
        event: ResponseEvent,
    },
    /// No more events for `turn`; answer on `ack` once everything before it
    /// has been written.
    EndOfTurn {
        turn: TurnId,
        ack: oneshot::Sender<()>,
    },
}

/// Sending side of the pending-turn queue.
#[derive(Debug, Clone)]
pub struct TransmitQueue {
    tx: mpsc::Sender<TurnRequest>,
    capacity: usize,
}

/// Create the pending-turn queue. `max_pending` counts turns waiting behind
/// the one in progress.
pub fn turn_queue(max_pending: usize) -> (TransmitQueue, mpsc::Receiver<TurnRequest>) {
    let capacity = max_pending.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (TransmitQueue { tx, capacity }, rx)
}

impl TransmitQueue {
    /// Queue a turn without waiting.
    ///
    /// # Errors
    /// A full queue rejects the turn with a transmission error.
    pub fn enqueue(&self, request: TurnRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(rejected) => TalkbackError::transmission(format!(
                "turn {} rejected: {} turns already waiting",
                rejected.turn, self.capacity
            )),
            mpsc::error::TrySendError::Closed(_) => TalkbackError::Cancelled,
        })
    }
}

/// The transmission worker.
pub struct Transmitter {
    pipeline: Arc<dyn ConversationPipeline>,
    playback: mpsc::Sender<PlaybackCommand>,
    outcomes: mpsc::Sender<TurnOutcome>,
    response_timeout: Option<Duration>,
    shutdown: ShutdownSignal,
}

impl Transmitter {
    pub fn new(
        pipeline: Arc<dyn ConversationPipeline>,
        playback: mpsc::Sender<PlaybackCommand>,
        outcomes: mpsc::Sender<TurnOutcome>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            pipeline,
            playback,
            outcomes,
            response_timeout: None,
            shutdown,
        }
    }

    /// Abort a turn when the backend stays silent this long, before its first
    /// event or between two events. `None` waits forever.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Process queued turns until shutdown or until the queue closes.
    pub async fn run(mut self, mut requests: mpsc::Receiver<TurnRequest>) {
        loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let turn = request.turn;
            let mut shutdown = self.shutdown.clone();
            let result = tokio::select! {
                biased;
                () = shutdown.cancelled() => Err(TalkbackError::Cancelled),
                result = self.transmit(request) => result,
            };

            let outcome = match result {
                Ok(chunks) => {
                    tracing::info!(%turn, chunks, "turn complete");
                    TurnOutcome::Completed { turn, chunks }
                }
                Err(TalkbackError::Cancelled) => break,
                Err(error) => {
                    tracing::warn!(%turn, error = %error, "turn failed");
                    TurnOutcome::Failed { turn, error }
                }
            };
            if self.outcomes.send(outcome).await.is_err() {
                break;
            }
        }
        tracing::debug!("transmitter stopped");
    }

    async fn transmit(&self, request: TurnRequest) -> Result<usize> {
        let TurnRequest { turn, payload } = request;
        let (events, input_closed) = match payload {
            TurnPayload::Batch(audio) => {
                tracing::info!(%turn, samples = audio.len(), backend = self.pipeline.name(), "submitting turn");
                (self.bounded(self.pipeline.submit(audio)).await??, None)
            }
            TurnPayload::Stream(frames) => {
                tracing::info!(%turn, backend = self.pipeline.name(), "opening live stream");
                let closed = frames.input_closed();
                (self.bounded(self.pipeline.open_stream(frames)).await??, Some(closed))
            }
        };

        let drained = self.drain(turn, events, input_closed).await;
        self.end_playback(turn).await?;
        drained
    }

    /// Forward events to playback until the stream ends. Returns the number
    /// of audio chunks.
    async fn drain(
        &self,
        turn: TurnId,
        mut events: ResponseStream,
        mut input_closed: Option<InputClosed>,
    ) -> Result<usize> {
        let mut chunks = 0;
        loop {
            // While the user is still talking the backend may legitimately
            // stay silent, so the idle timer starts once the input is closed.
            let next = match input_closed.as_mut() {
                Some(closed) if !closed.is_closed() => tokio::select! {
                    next = events.next() => next,
                    () = closed.wait() => continue,
                },
                _ => self.bounded(events.next()).await?,
            };

            let event = match next {
                None => return Ok(chunks),
                Some(event) => event?,
            };
            if let ResponseEvent::AudioChunk(bytes) = &event {
                chunks += 1;
                tracing::debug!(%turn, bytes = bytes.len(), "audio chunk");
            }
            self.playback
                .send(PlaybackCommand::Event { turn, event })
                .await
                .map_err(|_| TalkbackError::Cancelled)?;
        }
    }

    async fn end_playback(&self, turn: TurnId) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.playback
            .send(PlaybackCommand::EndOfTurn { turn, ack })
            .await
            .map_err(|_| TalkbackError::Cancelled)?;
        done.await.map_err(|_| TalkbackError::Cancelled)
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| TalkbackError::ResponseTimeout {
                    millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            None => Ok(fut.await),
        }
    }
}
