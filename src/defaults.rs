//! Default configuration constants for talkback.
//!
//! Shared by the config layer, the audio devices and the session tasks so the
//! same numbers are never spelled twice.

/// Audio sample rate in Hz for both capture and playback.
///
/// The conversation backend consumes and produces 24kHz mono PCM.
pub const SAMPLE_RATE: u32 = 24000;

/// Channel count for both capture and playback.
pub const CHANNELS: u16 = 1;

/// Samples per streaming push unit (20ms at 24kHz).
pub const READ_UNIT_SAMPLES: usize = 480;

/// Capacity of the channel between the capture callback and the controller.
///
/// At 20ms per hardware buffer this holds about five seconds of audio; the
/// callback drops frames rather than waiting when it is full.
pub const FRAME_QUEUE: usize = 256;

/// Key that starts and stops a recording turn.
pub const TOGGLE_KEY: char = 'r';

/// Key that ends the session.
pub const QUIT_KEY: char = 'q';

/// Interval between keyboard polls when no key is pressed.
pub const KEY_POLL_INTERVAL_MS: u64 = 10;

/// Finished turns allowed to wait while an earlier turn is still playing.
pub const MAX_PENDING_TURNS: usize = 2;

/// Upper bound on how long teardown waits for each task to acknowledge shutdown.
pub const SHUTDOWN_GRACE_MS: u64 = 500;

/// Seconds the backend may stay silent (before the first event or between
/// events) before the turn is aborted.
pub const RESPONSE_TIMEOUT_SECS: u64 = 30;

/// Default backend base URL for the HTTP pipeline.
pub const BACKEND_URL: &str = "http://127.0.0.1:8080";

/// Samples the playback queue may hold before `write` starts blocking (200ms).
pub const PLAYBACK_HIGH_WATER: usize = 4800;

/// Bytes per audio chunk produced by the echo pipeline (100ms of i16 PCM).
pub const ECHO_CHUNK_BYTES: usize = 4800;
