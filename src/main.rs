use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::Path;
use talkback::app::{device_listing, run_session};
use talkback::cli::{Cli, Commands, ConfigAction};
use talkback::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!(version = %talkback::version_string(), "starting");

    match cli.command {
        None => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(mode) = cli.mode {
                config.session.mode = mode;
            }
            if let Some(kind) = cli.backend {
                config.backend.kind = kind;
            }
            if let Some(url) = cli.url {
                config.backend.url = url;
            }
            if let Some(timeout) = cli.response_timeout {
                config.backend.set_response_timeout(timeout);
            }

            let summary = run_session(config, cli.quiet)
                .await
                .context("session failed")?;
            tracing::debug!(?summary, "session summary");
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Stderr logging: warn by default, `-v` info, `-vv` debug. `RUST_LOG` wins.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let (inputs, outputs) = device_listing()?;

    for (title, devices) in [("Input devices:", inputs), ("Output devices:", outputs)] {
        println!("{}", title.bold());
        if devices.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for (idx, device) in devices.iter().enumerate() {
            if device.ends_with("[recommended]") {
                println!("  [{}] {}", idx, device.green());
            } else {
                println!("  [{}] {}", idx, device);
            }
        }
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
