//! Port resolution: which serial devices carry commands and audio.
//!
//! Discovery by USB vendor/product id is platform specific and lives
//! outside this crate; the session only needs the resolved pair.

use crate::config::ModemConfig;
use crate::error::{Result, SimvoiceError};
use serde::{Deserialize, Serialize};

/// The two serial ports of one modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub command: String,
    pub audio: String,
}

/// Resolves the command/audio port pair.
pub trait PortResolver: Send + Sync {
    fn resolve(&self) -> Result<PortPair>;
}

/// Resolver backed by explicit configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPorts {
    command: Option<String>,
    audio: Option<String>,
}

impl ConfiguredPorts {
    pub fn new(command: Option<String>, audio: Option<String>) -> Self {
        Self { command, audio }
    }

    pub fn from_config(config: &ModemConfig) -> Self {
        Self::new(config.command_port.clone(), config.audio_port.clone())
    }
}

impl PortResolver for ConfiguredPorts {
    fn resolve(&self) -> Result<PortPair> {
        let pick = |value: &Option<String>, key: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SimvoiceError::TransportUnavailable {
                    port: key.to_string(),
                    message: format!("no {} configured", key),
                })
        };

        Ok(PortPair {
            command: pick(&self.command, "modem.command_port")?,
            audio: pick(&self.audio, "modem.audio_port")?,
        })
    }
}
