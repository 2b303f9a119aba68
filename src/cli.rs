//! Command-line interface for talkback
//!
//! Provides argument parsing using clap derive macros.

use crate::backend::BackendKind;
use crate::session::gate::SessionMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Push-to-talk voice conversation in the terminal
#[derive(Parser, Debug)]
#[command(
    name = "talkback",
    version,
    about = "Push-to-talk voice conversation in the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: interactive session)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress the usage hint and status line
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: lifecycle events, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Session mode: batch (one upload per turn) or streaming
    #[arg(long, value_name = "MODE")]
    pub mode: Option<SessionMode>,

    /// Conversation backend: echo (offline loopback) or http
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Base URL of the http backend
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Abort a turn when the backend is silent this long (e.g. 30s, 2m; 0 disables)
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub response_timeout: Option<Duration>,
}

/// Parse a timeout string.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`30s`, `2m`, `1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List audio input and output devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommand actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
