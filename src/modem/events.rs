//! Events published to consumers of a modem session.

use crate::call::CallState;
use crate::protocol::event::UnsolicitedEvent;
use crate::protocol::sms::{SmsMessage, SmsProvenance};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// What a subscriber sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModemEvent {
    CallStateChanged { state: CallState },
    CallerId { number: String },
    SmsReceived { message: SmsMessage },
    CallWaiting { enabled: bool },
}

impl SmsMessage {
    /// Build a message from a completed SMS event.
    ///
    /// Returns `None` for non-SMS events and for a `+CMGR` read whose index
    /// is unknown.
    pub fn from_event(event: &UnsolicitedEvent) -> Option<Self> {
        match event {
            UnsolicitedEvent::ImmediateSmsReceived {
                sender,
                timestamp,
                body,
            } => Some(Self {
                provenance: SmsProvenance::Immediate,
                sender: sender.clone(),
                timestamp: timestamp.clone(),
                text: body.clone(),
            }),
            UnsolicitedEvent::StoredSmsRead {
                index: Some(index),
                sender,
                timestamp,
                body,
            } => Some(Self {
                provenance: SmsProvenance::Stored { index: *index },
                sender: sender.clone(),
                timestamp: timestamp.clone(),
                text: body.clone(),
            }),
            _ => None,
        }
    }
}

/// Fan-out of [`ModemEvent`]s to any number of receivers.
///
/// Receivers that have been dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    senders: Arc<Mutex<Vec<Sender<ModemEvent>>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ModemEvent> {
        let (tx, rx) = unbounded();
        match self.senders.lock() {
            Ok(mut senders) => senders.push(tx),
            Err(e) => tracing::error!("Subscriber list poisoned: {}", e),
        }
        rx
    }

    pub fn publish(&self, event: ModemEvent) {
        let Ok(mut senders) = self.senders.lock() else {
            return;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop all senders so every receiver sees a disconnect.
    pub fn clear(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
