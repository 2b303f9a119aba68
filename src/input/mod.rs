//! Keyboard input.

pub mod keys;
pub mod terminal;

pub use keys::{ChannelKeySource, KeyBindings, KeyCommand, KeyPresser, KeySource, run_key_poller};
pub use terminal::TerminalKeySource;
