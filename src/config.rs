use crate::defaults;
use crate::error::{Result, SimvoiceError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub modem: ModemConfig,
    pub audio: AudioConfig,
    pub daemon: DaemonConfig,
}

/// Serial ports, pacing and modem-side audio settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModemConfig {
    pub command_port: Option<String>,
    pub audio_port: Option<String>,
    pub baud_rate: u32,
    pub audio_baud_rate: u32,
    pub settle_ms: u64,
    pub command_pacing_ms: u64,
    pub sms_delivery: SmsDelivery,
    pub echo_cancellation: bool,
    pub speaker_level: Option<u8>,
    pub mic_gain: Option<u8>,
}

/// Host audio relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub echo_suppression: f32,
    pub max_buffer_ms: u32,
    pub poll_interval_ms: u64,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket: Option<PathBuf>,
}

/// How the modem announces new SMS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmsDelivery {
    /// Store on the SIM and announce with `+CMTI`, then read by index.
    #[default]
    Stored,
    /// Forward directly to the host with `+CMT`.
    Direct,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            command_port: None,
            audio_port: None,
            baud_rate: defaults::COMMAND_BAUD_RATE,
            audio_baud_rate: defaults::AUDIO_BAUD_RATE,
            settle_ms: defaults::SETTLE_MS,
            command_pacing_ms: defaults::COMMAND_PACING_MS,
            sms_delivery: SmsDelivery::Stored,
            echo_cancellation: true,
            speaker_level: None,
            mic_gain: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            echo_suppression: defaults::ECHO_SUPPRESSION,
            max_buffer_ms: defaults::MAX_BUFFER_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl ModemConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.command_pacing_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SIMVOICE_COMMAND_PORT → modem.command_port
    /// - SIMVOICE_AUDIO_PORT → modem.audio_port
    /// - SIMVOICE_INPUT_DEVICE → audio.input_device
    /// - SIMVOICE_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("SIMVOICE_COMMAND_PORT")
            && !port.is_empty()
        {
            self.modem.command_port = Some(port);
        }

        if let Ok(port) = std::env::var("SIMVOICE_AUDIO_PORT")
            && !port.is_empty()
        {
            self.modem.audio_port = Some(port);
        }

        if let Ok(device) = std::env::var("SIMVOICE_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("SIMVOICE_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let suppression = self.audio.echo_suppression;
        if !(suppression > 0.0 && suppression <= 1.0) {
            return Err(SimvoiceError::ConfigInvalidValue {
                key: "audio.echo_suppression".to_string(),
                message: format!("must be in (0, 1], got {}", suppression),
            });
        }
        if self.audio.max_buffer_ms == 0 {
            return Err(SimvoiceError::ConfigInvalidValue {
                key: "audio.max_buffer_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.modem.baud_rate == 0 || self.modem.audio_baud_rate == 0 {
            return Err(SimvoiceError::ConfigInvalidValue {
                key: "modem.baud_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/simvoice/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("simvoice")
            .join("config.toml")
    }
}
