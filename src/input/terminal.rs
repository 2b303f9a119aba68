//! Key source reading the controlling terminal.
//!
//! Stdin is switched to non-canonical, no-echo mode for the lifetime of the
//! source so single key presses arrive without Enter.

use crate::error::{Result, TalkbackError};
use crate::input::keys::KeySource;
use crate::sys::{RawTerminal, read_stdin_nonblocking, stdin_is_terminal};

pub struct TerminalKeySource {
    _raw: RawTerminal,
    buf: [u8; 64],
}

impl TerminalKeySource {
    /// # Errors
    /// Fails when stdin is not a terminal or its mode cannot be changed.
    pub fn new() -> Result<Self> {
        if !stdin_is_terminal() {
            return Err(TalkbackError::Terminal {
                message: "stdin is not a terminal".to_string(),
            });
        }
        let raw = RawTerminal::enable().map_err(|e| TalkbackError::Terminal {
            message: format!("Failed to enable raw key input: {e}"),
        })?;
        Ok(Self {
            _raw: raw,
            buf: [0; 64],
        })
    }
}

impl KeySource for TerminalKeySource {
    fn poll(&mut self) -> Result<Vec<char>> {
        let n = read_stdin_nonblocking(&mut self.buf)?;
        Ok(decode_keys(&self.buf[..n]))
    }
}

/// Printable ASCII keys in input order. Escape sequences and multi-byte
/// characters are ignored.
fn decode_keys(bytes: &[u8]) -> Vec<char> {
    const ESC: u8 = 0x1b;
    let mut keys = Vec::new();
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        if b == ESC {
            // CSI/SS3 sequence: skip through its final byte.
            if let Some(b'[' | b'O') = iter.next() {
                for b in iter.by_ref() {
                    if (0x40..=0x7e).contains(&b) {
                        break;
                    }
                }
            }
            continue;
        }
        if b.is_ascii_graphic() || b == b' ' {
            keys.push(char::from(b));
        }
    }
    keys
}
