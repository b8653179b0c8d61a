//! Error types for simvoice.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimvoiceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Transport errors
    #[error("Transport unavailable on {port}: {message}")]
    TransportUnavailable { port: String, message: String },

    #[error("Transport I/O failed: {message}")]
    Transport { message: String },

    // User-facing rejections
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Cannot {action} while {state}")]
    InvalidStateTransition { action: String, state: String },

    // Audio errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl SimvoiceError {
    /// Shorthand for [`SimvoiceError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Shorthand for [`SimvoiceError::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SimvoiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_transport_unavailable_display() {
        let error = SimvoiceError::TransportUnavailable {
            port: "/dev/ttyUSB2".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transport unavailable on /dev/ttyUSB2: permission denied"
        );
    }

    #[test]
    fn test_transport_display() {
        let error = SimvoiceError::transport("write timed out");
        assert_eq!(error.to_string(), "Transport I/O failed: write timed out");
    }

    #[test]
    fn test_invalid_input_display() {
        let error = SimvoiceError::invalid_input("phone number is blank");
        assert_eq!(error.to_string(), "Invalid input: phone number is blank");
    }

    #[test]
    fn test_invalid_state_transition_display() {
        let error = SimvoiceError::InvalidStateTransition {
            action: "answer".to_string(),
            state: "idle".to_string(),
        };
        assert_eq!(error.to_string(), "Cannot answer while idle");
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = SimvoiceError::ConfigInvalidValue {
            key: "audio.echo_suppression".to_string(),
            message: "must be in (0, 1]".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.echo_suppression: must be in (0, 1]"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = SimvoiceError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_playback_display() {
        let error = SimvoiceError::AudioPlayback {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Audio playback failed: stream closed");
    }

    #[test]
    fn test_ipc_connection_display() {
        let error = SimvoiceError::IpcConnection {
            message: "timeout".to_string(),
        };
        assert_eq!(error.to_string(), "IPC connection failed: timeout");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: SimvoiceError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: SimvoiceError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: SimvoiceError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SimvoiceError>();
        assert_sync::<SimvoiceError>();
    }
}
