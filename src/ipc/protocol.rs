//! JSON message protocol for IPC communication between CLI and daemon.

use crate::call::CallState;
use crate::modem::ModemEvent;
use crate::protocol::ForwardReason;
use serde::{Deserialize, Serialize};

/// What a `call_waiting` command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallWaitingMode {
    On,
    Off,
    Query,
}

/// Commands sent by CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Place a voice call
    Dial { number: String },
    /// Answer the ringing call
    Answer,
    /// End the active call
    Hangup,
    /// Get call status
    Status,
    SendSms { recipient: String, body: String },
    /// Read one stored message, or all of them when `index` is absent
    ReadSms {
        #[serde(default)]
        index: Option<u32>,
    },
    ListSms,
    /// Delete one stored message, or all of them when `index` is absent
    DeleteSms {
        #[serde(default)]
        index: Option<u32>,
    },
    CallWaiting { mode: CallWaitingMode },
    CallForwarding {
        reason: ForwardReason,
        enabled: bool,
        #[serde(default)]
        number: Option<String>,
    },
    /// Keep the connection open and stream [`DaemonEvent`] lines
    Follow,
    /// Shutdown the daemon
    Shutdown,
}

impl Command {
    /// Serialize command to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize command from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent by daemon to CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded
    Ok,
    /// Current call status
    Status {
        call_state: CallState,
        relay_active: bool,
    },
    /// Error occurred
    Error { message: String },
}

impl Response {
    /// Serialize response to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize response from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Lines written to a `follow` client after its initial [`Response::Ok`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEvent {
    Modem { event: ModemEvent },
    /// The daemon is going away; no more lines follow
    Closed,
}

impl DaemonEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
