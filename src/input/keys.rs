//! Key sources, bindings and the key-poll task.

use crate::defaults::{QUIT_KEY, TOGGLE_KEY};
use crate::error::{Result, TalkbackError};
use crate::session::control::ShutdownSignal;
use std::time::Duration;
use tokio::sync::mpsc;

/// Anything that can report recently pressed keys without blocking.
pub trait KeySource: Send {
    /// Keys pressed since the last call, oldest first. Empty when none.
    fn poll(&mut self) -> Result<Vec<char>>;
}

/// What a recognised key asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    ToggleRecording,
    Quit,
}

/// Mapping from keys to commands. Matching ignores ASCII case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    toggle: char,
    quit: char,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            toggle: TOGGLE_KEY,
            quit: QUIT_KEY,
        }
    }
}

impl KeyBindings {
    /// # Errors
    /// Rejects bindings where both commands share a key.
    pub fn new(toggle: char, quit: char) -> Result<Self> {
        if toggle.eq_ignore_ascii_case(&quit) {
            return Err(TalkbackError::ConfigInvalidValue {
                key: "keys".to_string(),
                message: format!("toggle and quit cannot both be '{toggle}'"),
            });
        }
        Ok(Self { toggle, quit })
    }

    pub fn toggle(&self) -> char {
        self.toggle
    }

    pub fn quit(&self) -> char {
        self.quit
    }

    pub fn resolve(&self, key: char) -> Option<KeyCommand> {
        if key.eq_ignore_ascii_case(&self.toggle) {
            Some(KeyCommand::ToggleRecording)
        } else if key.eq_ignore_ascii_case(&self.quit) {
            Some(KeyCommand::Quit)
        } else {
            None
        }
    }

    /// One-line hint printed when the session starts.
    pub fn usage_hint(&self) -> String {
        format!(
            "Press \"{}\" to start/stop recording, \"{}\" to quit",
            self.toggle, self.quit
        )
    }
}

/// Event-driven key source fed through a channel.
///
/// Used for tests and for embedding the session under another input loop.
pub struct ChannelKeySource {
    rx: mpsc::UnboundedReceiver<char>,
}

/// Sending half of a [`ChannelKeySource`].
#[derive(Debug, Clone)]
pub struct KeyPresser {
    tx: mpsc::UnboundedSender<char>,
}

impl ChannelKeySource {
    pub fn new() -> (KeyPresser, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (KeyPresser { tx }, Self { rx })
    }
}

impl KeyPresser {
    /// Queue one key press. Returns false once the source is gone.
    pub fn press(&self, key: char) -> bool {
        self.tx.send(key).is_ok()
    }
}

impl KeySource for ChannelKeySource {
    fn poll(&mut self) -> Result<Vec<char>> {
        let mut keys = Vec::new();
        while let Ok(key) = self.rx.try_recv() {
            keys.push(key);
        }
        Ok(keys)
    }
}

/// Poll `source` every `interval` and forward recognised keys as commands.
///
/// Ends on shutdown, after forwarding `Quit`, or when the controller stops
/// listening. A failing key source is treated as a quit request so the
/// session can never be left without a way out.
pub async fn run_key_poller(
    mut source: Box<dyn KeySource>,
    bindings: KeyBindings,
    interval: Duration,
    commands: mpsc::Sender<KeyCommand>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        if shutdown.is_requested() {
            return;
        }

        let keys = match source.poll() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "key input failed, quitting");
                let _ = commands.send(KeyCommand::Quit).await;
                return;
            }
        };

        for command in keys.into_iter().filter_map(|key| bindings.resolve(key)) {
            tracing::debug!(?command, "key");
            if commands.send(command).await.is_err() || command == KeyCommand::Quit {
                return;
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::control::ControlState;

    struct FailingSource;

    impl KeySource for FailingSource {
        fn poll(&mut self) -> Result<Vec<char>> {
            Err(TalkbackError::Terminal {
                message: "stdin closed".to_string(),
            })
        }
    }

    #[test]
    fn test_resolve_ignores_case_and_unbound_keys() {
        let bindings = KeyBindings::default();
        assert_eq!(bindings.resolve('r'), Some(KeyCommand::ToggleRecording));
        assert_eq!(bindings.resolve('R'), Some(KeyCommand::ToggleRecording));
        assert_eq!(bindings.resolve('Q'), Some(KeyCommand::Quit));
        assert_eq!(bindings.resolve('x'), None);
    }

    #[test]
    fn test_bindings_reject_shared_key() {
        assert!(KeyBindings::new('a', 'A').is_err());
        assert!(KeyBindings::new('a', 'b').is_ok());
    }

    #[test]
    fn test_usage_hint() {
        assert_eq!(
            KeyBindings::default().usage_hint(),
            "Press \"r\" to start/stop recording, \"q\" to quit"
        );
    }

    #[test]
    fn test_channel_source_drains_in_order() {
        let (presser, mut source) = ChannelKeySource::new();
        presser.press('a');
        presser.press('b');
        assert_eq!(source.poll().unwrap(), vec!['a', 'b']);
        assert!(source.poll().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poller_forwards_commands_and_stops_after_quit() {
        let control = ControlState::new();
        let (presser, source) = ChannelKeySource::new();
        let (tx, mut rx) = mpsc::channel(8);
        presser.press('x');
        presser.press('r');
        presser.press('q');
        presser.press('r');

        run_key_poller(
            Box::new(source),
            KeyBindings::default(),
            Duration::from_millis(1),
            tx,
            control.shutdown_signal(),
        )
        .await;

        assert_eq!(rx.recv().await, Some(KeyCommand::ToggleRecording));
        assert_eq!(rx.recv().await, Some(KeyCommand::Quit));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_poller_exits_on_shutdown() {
        let control = ControlState::new();
        let (_presser, source) = ChannelKeySource::new();
        let (tx, _rx) = mpsc::channel(8);
        let poller = tokio::spawn(run_key_poller(
            Box::new(source),
            KeyBindings::default(),
            Duration::from_millis(5),
            tx,
            control.shutdown_signal(),
        ));

        control.request_shutdown();

        tokio::time::timeout(Duration::from_secs(1), poller)
            .await
            .expect("poller should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_source_requests_quit() {
        let control = ControlState::new();
        let (tx, mut rx) = mpsc::channel(8);
        run_key_poller(
            Box::new(FailingSource),
            KeyBindings::default(),
            Duration::from_millis(1),
            tx,
            control.shutdown_signal(),
        )
        .await;
        assert_eq!(rx.recv().await, Some(KeyCommand::Quit));
    }
}
