//! simvoice - Voice calls and SMS through a SIM7600-class cellular modem
//!
//! The modem exposes two serial ports: one for AT commands and unsolicited
//! result codes, one carrying raw 8 kHz PCM while a call is up. This crate
//! turns the command port's byte stream into typed events, runs the call
//! lifecycle, reassembles text messages and relays call audio to the host's
//! sound devices.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod call;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
#[cfg(feature = "cli")]
pub mod logging;
pub mod modem;
pub mod protocol;
pub mod transport;

// Core seams (transport → dispatch → call control → relay)
pub use audio::{AudioSink, AudioSource, DeviceProvider};
pub use call::{CallCommand, CallState, CallStateMachine, RelayControl};
pub use protocol::{LineReassembler, SmsMessage, SmsProvenance, UnsolicitedEvent, UrcDispatcher};
pub use transport::{PortPair, PortResolver, Transport};

// Session
pub use modem::{Modem, ModemEvent, ModemParts, SmsSelector};

// Error handling
pub use error::{Result, SimvoiceError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
