//! talkback - push-to-talk voice conversation in the terminal
//!
//! Records the microphone while a key toggles recording on, sends each turn
//! to a conversation backend and plays the spoken reply as it streams back.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod input;
pub mod output;
pub mod session;
pub mod sys;

// Composition root - needs real devices and the CLI surface
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Device seams
pub use audio::capture::InputDevice;
pub use audio::playback::OutputDevice;
pub use input::keys::KeySource;

// Backend
pub use backend::{ConversationPipeline, ResponseEvent};

// Session
pub use session::{ErrorReporter, LifecycleController, SessionMode, SessionSettings, SessionSummary};

// Error handling
pub use error::{Result, TalkbackError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
