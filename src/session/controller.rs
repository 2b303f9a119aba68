//! Lifecycle controller.
//!
//! Owns the recording gate and both audio devices, spawns the key-poll,
//! transmission and playback tasks, and reacts to keys, captured frames and
//! turn outcomes from a single select loop. Quitting latches shutdown, closes
//! the input at once, waits a bounded time for the tasks, then closes the
//! output. Devices are closed exactly once on every exit path.

use crate::audio::capture::{CaptureStats, CapturedFrame, FrameProducer, InputDevice};
use crate::audio::frame::SampleEncoding;
use crate::audio::playback::OutputDevice;
use crate::backend::ConversationPipeline;
use crate::defaults;
use crate::error::Result;
use crate::input::keys::{KeyBindings, KeyCommand, KeySource, run_key_poller};
use crate::output::{SilentStatus, StatusView};
use crate::session::control::ControlState;
use crate::session::gate::{AudioFormat, Phase, RecordingGate, SessionMode};
use crate::session::report::{ErrorReporter, LogReporter};
use crate::session::sink::{PlaybackSink, PlaybackStats};
use crate::session::transmit::{TransmitQueue, TurnOutcome, Transmitter, turn_queue};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tunables for one interactive session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub mode: SessionMode,
    pub format: AudioFormat,
    pub bindings: KeyBindings,
    pub poll_interval: Duration,
    pub frame_queue: usize,
    pub max_pending_turns: usize,
    pub response_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mode: SessionMode::Batch,
            format: AudioFormat {
                encoding: SampleEncoding::default(),
                sample_rate: defaults::SAMPLE_RATE,
                channels: defaults::CHANNELS,
                read_unit: defaults::READ_UNIT_SAMPLES,
            },
            bindings: KeyBindings::default(),
            poll_interval: Duration::from_millis(defaults::KEY_POLL_INTERVAL_MS),
            frame_queue: defaults::FRAME_QUEUE,
            max_pending_turns: defaults::MAX_PENDING_TURNS,
            response_timeout: Some(Duration::from_secs(defaults::RESPONSE_TIMEOUT_SECS)),
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
        }
    }
}

/// What happened during a session, returned after a clean quit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub frames_discarded: u64,
    pub capture_callbacks: u64,
    pub frames_overflowed: u64,
    pub chunks_written: u64,
    pub write_failures: u64,
}

/// Closes each device once, explicitly or on drop.
struct Devices {
    input: Box<dyn InputDevice>,
    output: Arc<dyn OutputDevice>,
    input_open: bool,
    output_open: bool,
}

impl Devices {
    fn close_input(&mut self) {
        if std::mem::take(&mut self.input_open) {
            if let Err(e) = self.input.close() {
                tracing::warn!(device = self.input.name(), error = %e, "closing input failed");
            }
            tracing::debug!(device = self.input.name(), "input closed");
        }
    }

    fn close_output(&mut self) {
        if std::mem::take(&mut self.output_open) {
            if let Err(e) = self.output.close() {
                tracing::warn!(device = self.output.name(), error = %e, "closing output failed");
            }
            tracing::debug!(device = self.output.name(), "output closed");
        }
    }
}

impl Drop for Devices {
    fn drop(&mut self) {
        self.close_input();
        self.close_output();
    }
}

pub struct LifecycleController {
    settings: SessionSettings,
    control: Arc<ControlState>,
    input: Box<dyn InputDevice>,
    output: Arc<dyn OutputDevice>,
    pipeline: Arc<dyn ConversationPipeline>,
    keys: Box<dyn KeySource>,
    status: Arc<dyn StatusView>,
    reporter: Arc<dyn ErrorReporter>,
    interrupt: BoxFuture<'static, ()>,
}

impl LifecycleController {
    /// Both devices must already be open; the controller takes ownership and
    /// releases them when the session ends.
    pub fn new(
        settings: SessionSettings,
        input: Box<dyn InputDevice>,
        output: Arc<dyn OutputDevice>,
        pipeline: Arc<dyn ConversationPipeline>,
        keys: Box<dyn KeySource>,
    ) -> Self {
        Self {
            settings,
            control: Arc::new(ControlState::new()),
            input,
            output,
            pipeline,
            keys,
            status: Arc::new(SilentStatus),
            reporter: Arc::new(LogReporter),
            interrupt: Box::pin(std::future::pending()),
        }
    }

    pub fn with_status(mut self, status: Arc<dyn StatusView>) -> Self {
        self.status = status;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// End the session like the quit key once `interrupt` resolves.
    pub fn with_interrupt(mut self, interrupt: impl Future<Output = ()> + Send + 'static) -> Self {
        self.interrupt = Box::pin(interrupt);
        self
    }

    /// Shared control state, for observers outside the session.
    pub fn control(&self) -> Arc<ControlState> {
        Arc::clone(&self.control)
    }

    /// Run until the quit key or the interrupt.
    ///
    /// # Errors
    /// Only setup failures (the input device refusing to start) are returned;
    /// per-turn failures are reported and the session continues.
    pub async fn run(self) -> Result<SessionSummary> {
        let LifecycleController {
            settings,
            control,
            input,
            output,
            pipeline,
            keys,
            status,
            reporter,
            mut interrupt,
        } = self;

        let mut devices = Devices {
            input,
            output: Arc::clone(&output),
            input_open: true,
            output_open: true,
        };

        let (frame_tx, mut frame_rx) = mpsc::channel::<CapturedFrame>(settings.frame_queue.max(1));
        let producer = FrameProducer::new(
            Arc::clone(&control),
            frame_tx,
            settings.format.encoding,
            settings.format.sample_rate,
            settings.format.channels,
        );
        let capture_stats = producer.stats();
        devices.input.start(producer)?;
        tracing::info!(
            input = devices.input.name(),
            output = devices.output.name(),
            backend = pipeline.name(),
            mode = %settings.mode,
            "session started"
        );

        let (key_tx, mut key_rx) = mpsc::channel(16);
        let (queue, requests) = turn_queue(settings.max_pending_turns);
        let (playback_tx, playback_rx) = mpsc::channel(64);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(16);

        let sink = PlaybackSink::new(
            output,
            Arc::clone(&status),
            Arc::clone(&reporter),
            control.shutdown_signal(),
        );
        let playback_stats = sink.stats();

        let tasks: Vec<(&'static str, JoinHandle<()>)> = vec![
            (
                "keys",
                tokio::spawn(run_key_poller(
                    keys,
                    settings.bindings,
                    settings.poll_interval,
                    key_tx,
                    control.shutdown_signal(),
                )),
            ),
            (
                "transmit",
                tokio::spawn(
                    Transmitter::new(pipeline, playback_tx, outcome_tx, control.shutdown_signal())
                        .with_response_timeout(settings.response_timeout)
                        .run(requests),
                ),
            ),
            ("playback", tokio::spawn(sink.run(playback_rx))),
        ];

        let mut session = Session {
            gate: RecordingGate::new(Arc::clone(&control), settings.mode, settings.format),
            queue,
            status: Arc::clone(&status),
            reporter,
            summary: SessionSummary::default(),
        };
        status.recording(false);

        loop {
            tokio::select! {
                biased;
                () = &mut interrupt => {
                    tracing::info!("interrupted");
                    break;
                }
                command = key_rx.recv() => match command {
                    Some(KeyCommand::ToggleRecording) => session.toggle(&mut frame_rx),
                    Some(KeyCommand::Quit) | None => break,
                },
                Some(outcome) = outcome_rx.recv() => session.finish_turn(outcome),
                Some(captured) = frame_rx.recv() => session.accept(captured),
            }
        }

        tracing::info!("shutting down");
        control.request_shutdown();
        devices.close_input();

        let Session {
            gate,
            queue,
            mut summary,
            ..
        } = session;
        summary.frames_discarded = gate.discarded();
        drop(gate);
        drop(queue);

        join_with_grace(tasks, settings.shutdown_grace).await;
        devices.close_output();

        summary.capture_callbacks = capture_stats.callbacks();
        summary.frames_overflowed = capture_stats.overflowed();
        fill_playback(&mut summary, &playback_stats);
        log_summary(&summary, &capture_stats);
        Ok(summary)
    }
}

/// Loop state touched by the select arms.
struct Session {
    gate: RecordingGate,
    queue: TransmitQueue,
    status: Arc<dyn StatusView>,
    reporter: Arc<dyn ErrorReporter>,
    summary: SessionSummary,
}

impl Session {
    fn toggle(&mut self, frames: &mut mpsc::Receiver<CapturedFrame>) {
        if self.gate.phase() == Phase::Recording {
            // Everything captured before the key press belongs to this turn.
            self.gate.seal();
            while let Ok(captured) = frames.try_recv() {
                self.accept(captured);
            }
        }

        let Some(transition) = self.gate.toggle() else {
            return;
        };
        let recording = self.gate.phase() == Phase::Recording;
        if recording {
            self.summary.turns_started += 1;
        }
        self.status.recording(recording);

        if let Some(request) = transition.request
            && let Err(e) = self.queue.enqueue(request)
        {
            self.summary.turns_failed += 1;
            self.reporter.report("transmit", &e);
            if self.gate.abort(transition.turn) {
                self.status.recording(false);
            }
        }
    }

    fn accept(&mut self, captured: CapturedFrame) {
        let turn = captured.turn;
        if let Err(e) = self.gate.accept(captured) {
            self.reporter.report("capture", &e);
            if self.gate.abort(turn) {
                self.status.recording(false);
            }
        }
    }

    fn finish_turn(&mut self, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Completed { .. } => self.summary.turns_completed += 1,
            TurnOutcome::Failed { turn, error } => {
                self.summary.turns_failed += 1;
                self.reporter.report("transmit", &error);
                if self.gate.abort(turn) {
                    self.status.recording(false);
                }
            }
        }
    }
}

/// Wait for each task up to `grace`, aborting the ones that overrun.
async fn join_with_grace(tasks: Vec<(&'static str, JoinHandle<()>)>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for (name, mut handle) in tasks {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => tracing::error!(task = name, "task panicked"),
            Ok(Err(_)) => {}
            Err(_) => {
                tracing::warn!(task = name, "task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

fn fill_playback(summary: &mut SessionSummary, stats: &PlaybackStats) {
    summary.chunks_written = stats.writes();
    summary.write_failures = stats.failures();
}

fn log_summary(summary: &SessionSummary, capture: &CaptureStats) {
    tracing::info!(
        turns = summary.turns_started,
        completed = summary.turns_completed,
        failed = summary.turns_failed,
        forwarded = capture.forwarded(),
        overflowed = summary.frames_overflowed,
        chunks = summary.chunks_written,
        "session ended"
    );
}
