//! Status line rendering for the interactive session.
//!
//! One redrawn stdout line shows the recording glyph and, while response
//! audio is being written, a heartbeat that flips on every chunk.

use std::io::{self, Write};
use std::sync::Mutex;

const IDLE_GLYPH: char = '⏹';
const RECORDING_GLYPH: char = '⏺';
const PLAYING_GLYPH: char = '▶';

const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Erase the status line. Goes to stdout, where the status line lives.
pub fn clear_line() {
    let _ = write_clear(&mut io::stdout().lock());
}

fn write_clear(out: &mut impl Write) -> io::Result<()> {
    out.write_all(CLEAR_LINE.as_bytes())?;
    out.flush()
}

/// Receiver of session status changes. Purely cosmetic.
pub trait StatusView: Send + Sync {
    /// Recording gate changed phase.
    fn recording(&self, active: bool);

    /// A response chunk was written to the speaker.
    fn heartbeat(&self);

    /// The current turn finished playing.
    fn playback_idle(&self);
}

/// Discards all status updates (quiet mode).
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentStatus;

impl StatusView for SilentStatus {
    fn recording(&self, _active: bool) {}
    fn heartbeat(&self) {}
    fn playback_idle(&self) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StatusLine {
    recording: bool,
    /// `None` when nothing is playing.
    beat: Option<bool>,
}

impl StatusLine {
    fn render(&self) -> String {
        let glyph = if self.recording {
            RECORDING_GLYPH
        } else {
            IDLE_GLYPH
        };
        let beat = match self.beat {
            Some(true) => PLAYING_GLYPH,
            Some(false) | None => ' ',
        };
        format!("{CLEAR_LINE}{glyph} {beat}")
    }
}

/// Status line on stdout.
#[derive(Debug, Default)]
pub struct TerminalStatus {
    line: Mutex<StatusLine>,
}

impl TerminalStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, change: impl FnOnce(&mut StatusLine)) {
        let rendered = {
            let mut line = self.line.lock().unwrap_or_else(|e| e.into_inner());
            change(&mut line);
            line.render()
        };
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(rendered.as_bytes());
        let _ = stdout.flush();
    }
}

impl StatusView for TerminalStatus {
    fn recording(&self, active: bool) {
        self.update(|line| line.recording = active);
    }

    fn heartbeat(&self) {
        self.update(|line| line.beat = Some(!line.beat.unwrap_or(false)));
    }

    fn playback_idle(&self) {
        self.update(|line| line.beat = None);
    }
}

/// Hides the terminal cursor; shows it again when dropped.
pub struct CursorGuard {
    active: bool,
}

impl CursorGuard {
    pub fn hide() -> Self {
        print!("{HIDE_CURSOR}");
        let _ = io::stdout().flush();
        Self { active: true }
    }

    /// A guard that touches nothing (quiet mode, tests).
    pub fn inactive() -> Self {
        Self { active: false }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if self.active {
            println!("{SHOW_CURSOR}");
            let _ = io::stdout().flush();
        }
    }
}
