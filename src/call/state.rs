//! Call lifecycle state machine.
//!
//! The machine is driven from two directions: user commands
//! ([`CallCommand`]) and modem notifications ([`UnsolicitedEvent`]). It is
//! owned by exactly one thread (see [`crate::call::controller`]); nothing
//! else mutates [`CallState`].

use crate::error::{Result, SimvoiceError};
use crate::protocol::commands;
use crate::protocol::event::UnsolicitedEvent;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Where the single supported call currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    /// An incoming call is alerting. The number arrives with `+CLIP`,
    /// usually just after the first `RING`.
    Ringing { caller_number: Option<String> },
    Active,
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Active)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => f.write_str("idle"),
            CallState::Ringing {
                caller_number: Some(number),
            } => write!(f, "ringing ({})", number),
            CallState::Ringing { caller_number: None } => f.write_str("ringing"),
            CallState::Active => f.write_str("active"),
        }
    }
}

/// User-initiated call action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    Dial(String),
    Answer,
    EndCall,
}

impl CallCommand {
    fn verb(&self) -> &'static str {
        match self {
            CallCommand::Dial(_) => "dial",
            CallCommand::Answer => "answer",
            CallCommand::EndCall => "end call",
        }
    }
}

/// The audio relay as seen by the state machine.
///
/// Entering Active is the only thing that starts it; leaving Active is the
/// only thing that stops it.
pub trait RelayControl: Send {
    /// Start relaying. A failure leaves the call up without audio.
    fn start(&mut self) -> Result<()>;

    /// Stop relaying. Must be safe to call when not running.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Delays around call setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTiming {
    /// Wait after discarding buffers, before `ATD`/`ATA`.
    pub settle: Duration,
    /// Wait after every command write.
    pub pacing: Duration,
}

impl Default for CallTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(crate::defaults::SETTLE_MS),
            pacing: Duration::from_millis(crate::defaults::COMMAND_PACING_MS),
        }
    }
}

impl CallTiming {
    /// No delays; for tests.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            pacing: Duration::ZERO,
        }
    }
}

pub struct CallStateMachine<R: RelayControl> {
    state: CallState,
    command: Arc<dyn Transport>,
    audio: Arc<dyn Transport>,
    relay: R,
    timing: CallTiming,
}

impl<R: RelayControl> CallStateMachine<R> {
    pub fn new(command: Arc<dyn Transport>, audio: Arc<dyn Transport>, relay: R) -> Self {
        Self {
            state: CallState::Idle,
            command,
            audio,
            relay,
            timing: CallTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: CallTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn relay_active(&self) -> bool {
        self.relay.is_active()
    }

    /// Apply a user command.
    ///
    /// Invalid commands are rejected before anything is written. Once a
    /// transition is accepted it always completes, even if a command
    /// write fails along the way.
    pub fn handle_command(&mut self, command: CallCommand) -> Result<()> {
        let current = self.state.clone();
        match (current, command) {
            (CallState::Idle, CallCommand::Dial(number)) => {
                let dial = commands::dial(&number)?;
                tracing::info!("Dialing {}", number.trim());
                self.prepare_call_audio();
                self.send(&dial);
                self.enter_active();
                Ok(())
            }
            (CallState::Ringing { .. }, CallCommand::Answer) => {
                tracing::info!("Answering incoming call");
                self.prepare_call_audio();
                self.send(commands::ANSWER);
                self.enter_active();
                Ok(())
            }
            (CallState::Ringing { .. }, CallCommand::EndCall) => {
                tracing::info!("Rejecting incoming call");
                self.send(commands::HANG_UP);
                self.state = CallState::Idle;
                Ok(())
            }
            (CallState::Active, CallCommand::EndCall) => {
                tracing::info!("Hanging up");
                self.send(commands::HANG_UP);
                self.send(commands::PCM_AUDIO_OFF);
                self.relay.stop();
                self.state = CallState::Idle;
                Ok(())
            }
            (state, command) => Err(SimvoiceError::InvalidStateTransition {
                action: command.verb().to_string(),
                state: state.to_string(),
            }),
        }
    }

    /// Apply a modem notification. Events that mean nothing in the
    /// current state are ignored.
    pub fn handle_event(&mut self, event: &UnsolicitedEvent) {
        match (&self.state, event) {
            (CallState::Idle, UnsolicitedEvent::IncomingCallRinging) => {
                tracing::info!("Incoming call");
                self.state = CallState::Ringing {
                    caller_number: None,
                };
            }
            (CallState::Ringing { .. }, UnsolicitedEvent::CallerIdAvailable { number }) => {
                tracing::info!("Caller: {}", number);
                self.state = CallState::Ringing {
                    caller_number: Some(number.clone()),
                };
            }
            (
                CallState::Active,
                UnsolicitedEvent::RemoteCallEnded | UnsolicitedEvent::CallDisconnected,
            ) => {
                tracing::info!("Call ended by remote side");
                self.relay.stop();
                self.send(commands::HANG_UP);
                self.state = CallState::Idle;
            }
            (CallState::Active, UnsolicitedEvent::CallConnected) => {
                tracing::debug!("Voice path connected");
            }
            (state, event) => {
                tracing::trace!("{:?} ignored while {}", event, state);
            }
        }
    }

    /// Abandon any call; used at shutdown.
    pub fn terminate(&mut self) {
        if self.state.is_active() {
            self.send(commands::HANG_UP);
            self.send(commands::PCM_AUDIO_OFF);
        }
        self.relay.stop();
        self.state = CallState::Idle;
    }

    fn prepare_call_audio(&self) {
        for transport in [&self.command, &self.audio] {
            if let Err(e) = transport.discard_buffers() {
                tracing::warn!("Failed to discard {} buffers: {}", transport.name(), e);
            }
        }
        if !self.timing.settle.is_zero() {
            thread::sleep(self.timing.settle);
        }
    }

    fn enter_active(&mut self) {
        self.send(commands::PCM_AUDIO_ON);
        self.state = CallState::Active;
        if let Err(e) = self.relay.start() {
            tracing::error!("Audio relay failed to start, call continues without audio: {}", e);
        }
    }

    fn send(&self, command: &str) {
        tracing::debug!(port = self.command.name(), "TX {}", command);
        if let Err(e) = self.command.send(command) {
            tracing::warn!("Failed to send {}: {}", command, e);
        }
        if !self.timing.pacing.is_zero() {
            thread::sleep(self.timing.pacing);
        }
    }
}
