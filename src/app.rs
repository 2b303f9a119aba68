//! Interactive session entry point.
//!
//! Opens the speaker and microphone, builds the configured backend and hands
//! everything to the lifecycle controller.

use crate::audio::capture::{CpalInput, InputDevice};
use crate::audio::playback::{CpalOutput, OutputDevice};
use crate::backend::{BackendKind, ConversationPipeline, EchoPipeline};
use crate::config::{BackendConfig, Config};
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::input::terminal::TerminalKeySource;
use crate::output::{CursorGuard, SilentStatus, StatusView, TerminalStatus, clear_line};
use crate::session::controller::{LifecycleController, SessionSummary};
use crate::sys::suppress_audio_warnings;
use std::sync::Arc;

/// Run the push-to-talk session until the quit key.
///
/// # Arguments
/// * `config` - Effective configuration (file, env and CLI overrides applied)
/// * `quiet` - Suppress the usage hint and the status line
///
/// # Errors
/// Device, terminal or configuration failures during setup.
pub async fn run_session(config: Config, quiet: bool) -> Result<SessionSummary> {
    // Suppress noisy JACK/ALSA warnings before audio init
    suppress_audio_warnings();

    let settings = config.session_settings()?;
    let pipeline = build_pipeline(&config.backend)?;

    let output: Arc<dyn OutputDevice> = Arc::new(CpalOutput::open(
        config.audio.output_device.as_deref(),
        config.audio.sample_rate,
        config.audio.playback_buffer_samples,
    )?);
    let input: Box<dyn InputDevice> = Box::new(CpalInput::open(
        config.audio.input_device.as_deref(),
        config.audio.sample_rate,
        defaults::CHANNELS,
    )?);
    let keys = TerminalKeySource::new()?;

    let status: Arc<dyn StatusView> = if quiet {
        Arc::new(SilentStatus)
    } else {
        Arc::new(TerminalStatus::new())
    };
    if !quiet {
        println!("{}", settings.bindings.usage_hint());
    }
    let cursor = if quiet {
        CursorGuard::inactive()
    } else {
        CursorGuard::hide()
    };

    let controller = LifecycleController::new(settings, input, output, pipeline, Box::new(keys))
        .with_status(status)
        .with_interrupt(ctrl_c());
    let summary = controller.run().await;

    if !quiet {
        clear_line();
    }
    drop(cursor);
    summary
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to wait for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Build the conversation pipeline named by `backend.kind`.
///
/// # Errors
/// `ConfigInvalidValue` for an unusable URL or a backend not compiled in.
pub fn build_pipeline(backend: &BackendConfig) -> Result<Arc<dyn ConversationPipeline>> {
    match backend.kind {
        BackendKind::Echo => Ok(Arc::new(EchoPipeline::new())),
        #[cfg(feature = "http-backend")]
        BackendKind::Http => Ok(Arc::new(crate::backend::HttpPipeline::new(&backend.url)?)),
        #[cfg(not(feature = "http-backend"))]
        BackendKind::Http => Err(TalkbackError::ConfigInvalidValue {
            key: "backend.kind".to_string(),
            message: "built without the http-backend feature".to_string(),
        }),
    }
}

/// Input and output device names, marked when preferred.
///
/// # Errors
/// Returns a device error if the audio host cannot enumerate devices.
pub fn device_listing() -> Result<(Vec<String>, Vec<String>)> {
    let inputs = crate::audio::capture::list_input_devices()?;
    let outputs = crate::audio::capture::list_output_devices()?;
    if inputs.is_empty() && outputs.is_empty() {
        return Err(TalkbackError::AudioDeviceNotFound {
            device: "any".to_string(),
        });
    }
    Ok((inputs, outputs))
}
