//! Reporting of per-turn failures.
//!
//! Turn-scoped errors never end the session; they are printed and the user
//! can start another turn.

use crate::error::TalkbackError;

/// Trait for reporting errors from session tasks.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from `task` ("transmit", "playback", ...).
    fn report(&self, task: &str, error: &TalkbackError);
}

/// Prints to stderr, clearing the status line first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, task: &str, error: &TalkbackError) {
        tracing::warn!(task, error = %error, "turn error");
        eprintln_clear(&format!("[{task}] {error}"));
    }
}

/// Print a message to stderr, clearing any active status line first.
pub fn eprintln_clear(msg: &str) {
    eprint!("\r{:60}\r", "");
    eprintln!("{}", msg);
}
