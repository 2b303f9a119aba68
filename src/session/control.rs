//! Process-wide control state shared by every session task.
//!
//! Written only through the transition methods used by the lifecycle
//! controller; everything else reads it. The active turn id is a single atomic
//! so the realtime capture callback can check it without locking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Identifier of one recording turn. Ids start at 1 and never repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(u64);

impl TurnId {
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const IDLE: u64 = 0;

/// `{shutdownRequested, recordingActive}` plus the id of the active turn.
#[derive(Debug)]
pub struct ControlState {
    active_turn: AtomicU64,
    last_turn: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            active_turn: AtomicU64::new(IDLE),
            last_turn: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// The turn currently recording, if any.
    pub fn recording_turn(&self) -> Option<TurnId> {
        match self.active_turn.load(Ordering::Acquire) {
            IDLE => None,
            id => Some(TurnId(id)),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording_turn().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Start forwarding frames for a fresh turn. Refused after shutdown.
    pub(crate) fn begin_turn(&self) -> Option<TurnId> {
        if self.is_shutdown() {
            return None;
        }
        let id = self.last_turn.fetch_add(1, Ordering::AcqRel) + 1;
        self.active_turn.store(id, Ordering::Release);
        Some(TurnId(id))
    }

    /// Stop forwarding frames.
    pub(crate) fn end_turn(&self) {
        self.active_turn.store(IDLE, Ordering::Release);
    }

    /// Latch the shutdown flag. There is no way to clear it again.
    pub(crate) fn request_shutdown(&self) {
        self.active_turn.store(IDLE, Ordering::Release);
        self.shutdown_tx.send_replace(true);
    }

    /// A cloneable handle tasks use to observe shutdown.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }
}

/// Read side of the shutdown flag, awaited at every suspension point.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (or the state was dropped).
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            // Sender gone: nothing can run any more, treat as shutdown.
        }
    }
}
