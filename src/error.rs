//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio format not supported by {device}: {message}")]
    AudioFormatUnsupported { device: String, message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Backend errors
    #[error("Transmission failed: {message}")]
    Transmission { message: String },

    #[error("No response from backend within {millis}ms")]
    ResponseTimeout { millis: u64 },

    #[error("Backend protocol error: {message}")]
    BackendProtocol { message: String },

    // Task cancelled during shutdown
    #[error("Cancelled")]
    Cancelled,

    // Terminal setup errors
    #[error("Terminal error: {message}")]
    Terminal { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// True for input/output device open or write failures.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            TalkbackError::AudioDeviceNotFound { .. }
                | TalkbackError::AudioFormatUnsupported { .. }
                | TalkbackError::AudioCapture { .. }
                | TalkbackError::AudioPlayback { .. }
        )
    }

    /// True for failures that end the current turn but never the process.
    pub fn is_turn_scoped(&self) -> bool {
        matches!(
            self,
            TalkbackError::Transmission { .. }
                | TalkbackError::ResponseTimeout { .. }
                | TalkbackError::BackendProtocol { .. }
        )
    }

    /// Shorthand for a transmission failure with a formatted message.
    pub fn transmission(message: impl Into<String>) -> Self {
        TalkbackError::Transmission {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkbackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = TalkbackError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = TalkbackError::ConfigInvalidValue {
            key: "audio.sample_rate".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.sample_rate: must be positive"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = TalkbackError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_playback_display() {
        let error = TalkbackError::AudioPlayback {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Audio playback failed: stream closed");
    }

    #[test]
    fn test_response_timeout_display() {
        let error = TalkbackError::ResponseTimeout { millis: 500 };
        assert_eq!(error.to_string(), "No response from backend within 500ms");
    }

    #[test]
    fn test_transmission_shorthand() {
        let error = TalkbackError::transmission("connection refused");
        assert_eq!(error.to_string(), "Transmission failed: connection refused");
    }

    #[test]
    fn test_device_errors_are_classified() {
        assert!(
            TalkbackError::AudioCapture {
                message: "x".into()
            }
            .is_device_error()
        );
        assert!(
            TalkbackError::AudioPlayback {
                message: "x".into()
            }
            .is_device_error()
        );
        assert!(!TalkbackError::transmission("x").is_device_error());
        assert!(!TalkbackError::Cancelled.is_device_error());
    }

    #[test]
    fn test_turn_scoped_errors_are_classified() {
        assert!(TalkbackError::transmission("x").is_turn_scoped());
        assert!(TalkbackError::ResponseTimeout { millis: 1000 }.is_turn_scoped());
        assert!(
            TalkbackError::BackendProtocol {
                message: "bad line".into()
            }
            .is_turn_scoped()
        );
        assert!(
            !TalkbackError::AudioDeviceNotFound {
                device: "hw:0".into()
            }
            .is_turn_scoped()
        );
        assert!(!TalkbackError::Cancelled.is_turn_scoped());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: TalkbackError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: TalkbackError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: TalkbackError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TalkbackError>();
        assert_sync::<TalkbackError>();
    }
}
