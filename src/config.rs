use crate::audio::frame::SampleEncoding;
use crate::backend::BackendKind;
use crate::defaults;
use crate::error::{Result, TalkbackError};
use crate::input::keys::KeyBindings;
use crate::session::controller::SessionSettings;
use crate::session::gate::{AudioFormat, SessionMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub keys: KeysConfig,
    pub session: SessionConfig,
    pub backend: BackendConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub input_encoding: SampleEncoding,
    /// Samples per streaming push.
    pub read_unit_samples: usize,
    pub frame_queue: usize,
    /// Samples queued for the speaker before writes block.
    pub playback_buffer_samples: usize,
}

/// Key binding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeysConfig {
    pub toggle: char,
    pub quit: char,
    pub poll_interval_ms: u64,
}

/// Session behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub max_pending_turns: usize,
    pub shutdown_grace_ms: u64,
}

/// Conversation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: String,
    /// 0 disables the timeout.
    pub response_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            input_encoding: SampleEncoding::default(),
            read_unit_samples: defaults::READ_UNIT_SAMPLES,
            frame_queue: defaults::FRAME_QUEUE,
            playback_buffer_samples: defaults::PLAYBACK_HIGH_WATER,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            toggle: defaults::TOGGLE_KEY,
            quit: defaults::QUIT_KEY,
            poll_interval_ms: defaults::KEY_POLL_INTERVAL_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            max_pending_turns: defaults::MAX_PENDING_TURNS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: defaults::BACKEND_URL.to_string(),
            response_timeout_secs: defaults::RESPONSE_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_secs > 0).then(|| Duration::from_secs(self.response_timeout_secs))
    }

    /// Set the timeout from a duration. Zero disables it; anything else is
    /// rounded up to whole seconds so a sub-second value never disables it.
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        let secs = timeout.as_secs();
        self.response_timeout_secs = if timeout.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        };
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file does not exist, `Config` for invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TalkbackError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                TalkbackError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// # Errors
    /// Invalid TOML and unreadable files are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TalkbackError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TALKBACK_BACKEND → backend.kind
    /// - TALKBACK_URL → backend.url
    /// - TALKBACK_MODE → session.mode
    /// - TALKBACK_INPUT_DEVICE → audio.input_device
    /// - TALKBACK_OUTPUT_DEVICE → audio.output_device
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(kind) = env_value("TALKBACK_BACKEND") {
            match kind.parse() {
                Ok(kind) => self.backend.kind = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring TALKBACK_BACKEND"),
            }
        }

        if let Some(url) = env_value("TALKBACK_URL") {
            self.backend.url = url;
        }

        if let Some(mode) = env_value("TALKBACK_MODE") {
            match mode.parse() {
                Ok(mode) => self.session.mode = mode,
                Err(e) => tracing::warn!(error = %e, "ignoring TALKBACK_MODE"),
            }
        }

        if let Some(device) = env_value("TALKBACK_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }

        if let Some(device) = env_value("TALKBACK_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Reject values the session cannot run with.
    ///
    /// # Errors
    /// `ConfigInvalidValue` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.read_unit_samples == 0 {
            return Err(invalid("audio.read_unit_samples", "must be positive"));
        }
        if self.audio.frame_queue == 0 {
            return Err(invalid("audio.frame_queue", "must be positive"));
        }
        KeyBindings::new(self.keys.toggle, self.keys.quit)?;
        if self.backend.kind == BackendKind::Http && self.backend.url.trim().is_empty() {
            return Err(invalid("backend.url", "required for the http backend"));
        }
        Ok(())
    }

    /// Validated session tunables.
    ///
    /// # Errors
    /// See [`Config::validate`].
    pub fn session_settings(&self) -> Result<SessionSettings> {
        self.validate()?;
        Ok(SessionSettings {
            mode: self.session.mode,
            format: AudioFormat {
                encoding: self.audio.input_encoding,
                sample_rate: self.audio.sample_rate,
                channels: defaults::CHANNELS,
                read_unit: self.audio.read_unit_samples,
            },
            bindings: KeyBindings::new(self.keys.toggle, self.keys.quit)?,
            poll_interval: Duration::from_millis(self.keys.poll_interval_ms.max(1)),
            frame_queue: self.audio.frame_queue,
            max_pending_turns: self.session.max_pending_turns,
            response_timeout: self.backend.response_timeout(),
            shutdown_grace: Duration::from_millis(self.session.shutdown_grace_ms),
        })
    }

    /// Render as TOML (for `config show`).
    ///
    /// # Errors
    /// Only if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TalkbackError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("talkback")
            .join("config.toml")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn invalid(key: &str, message: &str) -> TalkbackError {
    TalkbackError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{remove_env, set_env};
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Serializes tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 5] = [
        "TALKBACK_BACKEND",
        "TALKBACK_URL",
        "TALKBACK_MODE",
        "TALKBACK_INPUT_DEVICE",
        "TALKBACK_OUTPUT_DEVICE",
    ];

    fn clear_talkback_env() {
        for key in ENV_KEYS {
            remove_env(key);
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.read_unit_samples, 480);
        assert_eq!(config.keys.toggle, 'r');
        assert_eq!(config.keys.quit, 'q');
        assert_eq!(config.session.mode, SessionMode::Batch);
        assert_eq!(config.session.max_pending_turns, 2);
        assert_eq!(config.backend.kind, BackendKind::Echo);
        assert_eq!(config.backend.response_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [audio]
            input_device = "hw:0,0"
            output_device = "pipewire"
            input_encoding = "i16"

            [keys]
            toggle = " "
            quit = "x"

            [session]
            mode = "streaming"
            max_pending_turns = 4

            [backend]
            kind = "http"
            url = "http://voice.local:9000"
            response_timeout_secs = 0
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device.as_deref(), Some("hw:0,0"));
        assert_eq!(config.audio.output_device.as_deref(), Some("pipewire"));
        assert_eq!(config.audio.input_encoding, SampleEncoding::I16);
        assert_eq!(config.keys.toggle, ' ');
        assert_eq!(config.keys.quit, 'x');
        assert_eq!(config.session.mode, SessionMode::Streaming);
        assert_eq!(config.session.max_pending_turns, 4);
        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.backend.url, "http://voice.local:9000");
        assert_eq!(config.backend.response_timeout(), None);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [session]
            mode = "streaming"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.session.mode, SessionMode::Streaming);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.keys, KeysConfig::default());
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [audio
            input_device = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(TalkbackError::Config(_))));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_toml() {
        let temp_file = write_config("[session]\nmode = 3\n");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_override_backend_and_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_BACKEND", "http");
        set_env("TALKBACK_URL", "https://example.test");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.backend.url, "https://example.test");
        assert_eq!(config.session.mode, SessionMode::Batch);

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_mode_and_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_MODE", "stream");
        set_env("TALKBACK_INPUT_DEVICE", "mic");
        set_env("TALKBACK_OUTPUT_DEVICE", "speaker");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.mode, SessionMode::Streaming);
        assert_eq!(config.audio.input_device.as_deref(), Some("mic"));
        assert_eq!(config.audio.output_device.as_deref(), Some("speaker"));

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_invalid_or_empty_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_BACKEND", "carrier-pigeon");
        set_env("TALKBACK_URL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.backend, BackendConfig::default());

        clear_talkback_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.read_unit_samples = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.keys.quit = 'R';
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.kind = BackendKind::Http;
        config.backend.url = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_settings_follow_config() {
        let mut config = Config::default();
        config.session.mode = SessionMode::Streaming;
        config.audio.read_unit_samples = 960;
        config.backend.response_timeout_secs = 0;

        let settings = config.session_settings().unwrap();

        assert_eq!(settings.mode, SessionMode::Streaming);
        assert_eq!(settings.format.read_unit, 960);
        assert_eq!(settings.format.channels, 1);
        assert_eq!(settings.response_timeout, None);
        assert_eq!(settings.bindings, KeyBindings::default());
    }

    #[test]
    fn test_set_response_timeout_rounds_up() {
        let mut backend = BackendConfig::default();

        backend.set_response_timeout(Duration::from_millis(500));
        assert_eq!(backend.response_timeout(), Some(Duration::from_secs(1)));

        backend.set_response_timeout(Duration::from_millis(1500));
        assert_eq!(backend.response_timeout_secs, 2);

        backend.set_response_timeout(Duration::from_secs(45));
        assert_eq!(backend.response_timeout_secs, 45);

        backend.set_response_timeout(Duration::ZERO);
        assert_eq!(backend.response_timeout(), None);
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = Config::default();
        config.audio.output_device = Some("pipewire".to_string());
        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("talkback"));
        assert!(path_str.ends_with("config.toml"));
    }
}
