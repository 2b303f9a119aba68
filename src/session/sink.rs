//! Playback sink.
//!
//! Consumes [`PlaybackCommand`]s in arrival order and writes audio chunks to
//! the output device one at a time. Device writes may block, so each runs on
//! the blocking pool while this task awaits it; the key-poll loop and the
//! capture path never wait on the speaker.

use crate::audio::frame::bytes_to_pcm16;
use crate::audio::playback::OutputDevice;
use crate::backend::ResponseEvent;
use crate::error::TalkbackError;
use crate::output::StatusView;
use crate::session::control::{ShutdownSignal, TurnId};
use crate::session::report::ErrorReporter;
use crate::session::transmit::PlaybackCommand;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    writes: AtomicU64,
    failures: AtomicU64,
    markers: AtomicU64,
}

impl PlaybackStats {
    /// Chunks written successfully.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Lifecycle markers seen.
    pub fn markers(&self) -> u64 {
        self.markers.load(Ordering::SeqCst)
    }
}

/// Holds back an odd trailing byte so a sample is never split across chunks.
#[derive(Debug, Default)]
struct ByteCarry {
    turn: Option<TurnId>,
    byte: Option<u8>,
}

impl ByteCarry {
    fn samples(&mut self, turn: TurnId, bytes: &[u8]) -> Vec<i16> {
        if self.turn != Some(turn) {
            self.turn = Some(turn);
            self.byte = None;
        }
        let joined;
        let data = match self.byte.take() {
            Some(first) => {
                joined = [&[first][..], bytes].concat();
                joined.as_slice()
            }
            None => bytes,
        };
        if data.len() % 2 == 1 {
            self.byte = data.last().copied();
        }
        bytes_to_pcm16(data)
    }

    /// Forget any held byte. Returns true if one was dropped.
    fn end(&mut self, turn: TurnId) -> bool {
        self.turn == Some(turn) && self.byte.take().is_some()
    }
}

pub struct PlaybackSink {
    output: Arc<dyn OutputDevice>,
    status: Arc<dyn StatusView>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: ShutdownSignal,
    stats: Arc<PlaybackStats>,
    carry: ByteCarry,
}

impl PlaybackSink {
    pub fn new(
        output: Arc<dyn OutputDevice>,
        status: Arc<dyn StatusView>,
        reporter: Arc<dyn ErrorReporter>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            output,
            status,
            reporter,
            shutdown,
            stats: Arc::new(PlaybackStats::default()),
            carry: ByteCarry::default(),
        }
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }

    /// Drain commands until shutdown or until the transmitter goes away.
    pub async fn run(mut self, mut commands: mpsc::Receiver<PlaybackCommand>) {
        loop {
            let command = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                PlaybackCommand::Event {
                    turn,
                    event: ResponseEvent::AudioChunk(bytes),
                } => {
                    let samples = self.carry.samples(turn, &bytes);
                    if samples.is_empty() {
                        continue;
                    }
                    if self.shutdown.is_requested() {
                        break;
                    }
                    self.write(samples).await;
                }
                PlaybackCommand::Event {
                    turn,
                    event: ResponseEvent::Lifecycle(marker),
                } => {
                    self.stats.markers.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(%turn, %marker, "lifecycle");
                }
                PlaybackCommand::EndOfTurn { turn, ack } => {
                    if self.carry.end(turn) {
                        tracing::debug!(%turn, "dropped dangling byte at end of turn");
                    }
                    self.status.playback_idle();
                    let _ = ack.send(());
                }
            }
        }
        tracing::debug!("playback stopped");
    }

    /// One device write. Failures are reported and the chunk is not retried.
    async fn write(&self, samples: Vec<i16>) {
        let output = Arc::clone(&self.output);
        let result = tokio::task::spawn_blocking(move || output.write(&samples))
            .await
            .unwrap_or_else(|e| {
                Err(TalkbackError::AudioPlayback {
                    message: format!("write task failed: {e}"),
                })
            });

        match result {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::SeqCst);
                self.status.heartbeat();
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::SeqCst);
                self.reporter.report("playback", &e);
            }
        }
    }
}
