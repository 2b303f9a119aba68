//! Recording gate and per-turn accumulation.
//!
//! The gate is owned by the lifecycle controller. The capture callback only
//! reads the active turn id from [`ControlState`]; every frame it forwards is
//! tagged with that id, so frames that arrive after the turn ended (or from
//! an earlier turn) are recognised and dropped here.

use crate::audio::capture::CapturedFrame;
use crate::audio::frame::{AudioBuffer, AudioFrame, SampleEncoding, Samples};
use crate::backend::LiveInput;
use crate::error::{Result, TalkbackError};
use crate::session::control::{ControlState, TurnId};
use crate::session::transmit::{TurnPayload, TurnRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How recorded audio reaches the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One buffer per turn, submitted when recording stops.
    #[default]
    Batch,
    /// Frames pushed live while recording; one stream per recording interval.
    Streaming,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Batch => write!(f, "batch"),
            SessionMode::Streaming => write!(f, "streaming"),
        }
    }
}

impl std::str::FromStr for SessionMode {
    type Err = TalkbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "batch" => Ok(SessionMode::Batch),
            "streaming" | "stream" => Ok(SessionMode::Streaming),
            other => Err(TalkbackError::ConfigInvalidValue {
                key: "session.mode".to_string(),
                message: format!("unknown mode '{other}' (expected batch or streaming)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
}

/// Shape of the audio the gate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: SampleEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per streaming push.
    pub read_unit: usize,
}

/// Result of a phase change.
#[derive(Debug)]
pub struct GateTransition {
    pub turn: TurnId,
    /// Work for the transmission channel, if this transition produced any.
    pub request: Option<TurnRequest>,
}

/// Re-chunks captured frames into fixed read units for a live stream.
struct StreamAdapter {
    input: LiveInput,
    pending: Samples,
    format: AudioFormat,
}

impl StreamAdapter {
    fn push(&mut self, frame: &AudioFrame) -> Result<()> {
        self.pending.extend_from(frame.samples());
        let unit = self.format.read_unit.max(1);
        let whole = self.pending.len() / unit * unit;
        if whole == 0 {
            return Ok(());
        }
        let rest = self.pending.slice(whole, self.pending.len() - whole);
        let ready = std::mem::replace(&mut self.pending, rest);
        for start in (0..whole).step_by(unit) {
            self.input.push(AudioFrame::new(
                ready.slice(start, unit),
                self.format.sample_rate,
                self.format.channels,
            ))?;
        }
        Ok(())
    }

    /// Push the partial unit and close the input.
    fn finish(mut self) -> usize {
        if !self.pending.is_empty() {
            let tail = std::mem::replace(&mut self.pending, Samples::empty(self.format.encoding));
            if let Err(e) = self.input.push(AudioFrame::new(
                tail,
                self.format.sample_rate,
                self.format.channels,
            )) {
                tracing::debug!(error = %e, "dropping stream tail");
            }
        }
        self.input.close();
        self.input.pushed()
    }
}

enum Accumulator {
    Batch(Vec<AudioFrame>),
    Stream(StreamAdapter),
}

/// Idle/Recording state machine plus the accumulator of the active turn.
pub struct RecordingGate {
    control: Arc<ControlState>,
    mode: SessionMode,
    format: AudioFormat,
    active: Option<(TurnId, Accumulator)>,
    discarded: u64,
}

impl RecordingGate {
    pub fn new(control: Arc<ControlState>, mode: SessionMode, format: AudioFormat) -> Self {
        Self {
            control,
            mode,
            format,
            active: None,
            discarded: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.active.is_some() {
            Phase::Recording
        } else {
            Phase::Idle
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn active_turn(&self) -> Option<TurnId> {
        self.active.as_ref().map(|(turn, _)| *turn)
    }

    /// Frames dropped because they belonged to no active turn.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Flip the phase. `None` after shutdown.
    pub fn toggle(&mut self) -> Option<GateTransition> {
        match self.phase() {
            Phase::Idle => self.start(),
            Phase::Recording => self.stop(),
        }
    }

    /// Idle to Recording with a fresh accumulator. Streaming mode opens the
    /// live stream right away and hands it to the transmission channel.
    pub fn start(&mut self) -> Option<GateTransition> {
        if self.active.is_some() {
            return None;
        }
        let turn = self.control.begin_turn()?;
        let (accumulator, request) = match self.mode {
            SessionMode::Batch => (Accumulator::Batch(Vec::new()), None),
            SessionMode::Streaming => {
                let (input, frames) =
                    LiveInput::channel(self.format.sample_rate, self.format.channels);
                let adapter = StreamAdapter {
                    input,
                    pending: Samples::empty(self.format.encoding),
                    format: self.format,
                };
                let request = TurnRequest {
                    turn,
                    payload: TurnPayload::Stream(frames),
                };
                (Accumulator::Stream(adapter), Some(request))
            }
        };
        self.active = Some((turn, accumulator));
        tracing::info!(%turn, mode = %self.mode, "recording started");
        Some(GateTransition { turn, request })
    }

    /// Recording to Idle. Batch mode finalizes the buffer (possibly empty)
    /// into a submission; streaming mode closes the live input.
    pub fn stop(&mut self) -> Option<GateTransition> {
        let (turn, accumulator) = self.active.take()?;
        self.control.end_turn();
        let request = match accumulator {
            Accumulator::Batch(frames) => {
                let audio = AudioBuffer::concat(
                    &frames,
                    self.format.encoding,
                    self.format.sample_rate,
                    self.format.channels,
                );
                tracing::info!(%turn, samples = audio.len(), ms = audio.duration_ms(), "recording stopped");
                Some(TurnRequest {
                    turn,
                    payload: TurnPayload::Batch(audio),
                })
            }
            Accumulator::Stream(adapter) => {
                let pushed = adapter.finish();
                tracing::info!(%turn, pushed, "live stream closed");
                None
            }
        };
        Some(GateTransition { turn, request })
    }

    /// Drop the active turn without producing a submission.
    pub fn abort(&mut self, turn: TurnId) -> bool {
        match &self.active {
            Some((active, _)) if *active == turn => {}
            _ => return false,
        }
        if let Some((_, Accumulator::Stream(adapter))) = self.active.take() {
            adapter.finish();
        }
        self.control.end_turn();
        tracing::info!(%turn, "recording aborted");
        true
    }

    /// Stop the capture callback tagging frames with the active turn while
    /// the turn itself stays open, so frames already in flight can still be
    /// drained into it before [`stop`](Self::stop).
    pub fn seal(&self) {
        if self.active.is_some() {
            self.control.end_turn();
        }
    }

    /// Add a captured frame to the active turn.
    ///
    /// Frames tagged with another turn are discarded. In streaming mode a
    /// push failure means the pipeline gave up on the stream.
    pub fn accept(&mut self, captured: CapturedFrame) -> Result<()> {
        let Some((turn, accumulator)) = self.active.as_mut() else {
            self.discarded += 1;
            return Ok(());
        };
        if captured.turn != *turn {
            self.discarded += 1;
            return Ok(());
        }
        match accumulator {
            Accumulator::Batch(frames) => {
                frames.push(captured.frame);
                Ok(())
            }
            Accumulator::Stream(adapter) => adapter.push(&captured.frame),
        }
    }
}
