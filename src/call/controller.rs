//! Single-owner controller thread for the call state machine.
//!
//! User commands and dispatched modem events are serialized through one
//! channel, so the state machine never needs a lock. Whichever of two racing
//! inputs is processed second sees the state the first one left behind.

use crate::call::state::{CallCommand, CallState, CallStateMachine, RelayControl};
use crate::error::{Result, SimvoiceError};
use crate::modem::events::{ModemEvent, Subscribers};
use crate::protocol::commands;
use crate::protocol::dispatcher::PendingReads;
use crate::protocol::event::UnsolicitedEvent;
use crate::protocol::sms::SmsMessage;
use crate::transport::Transport;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatus {
    pub state: CallState,
    pub relay_active: bool,
}

enum ControllerMessage {
    Command {
        command: CallCommand,
        reply: Sender<Result<CallState>>,
    },
    Event(UnsolicitedEvent),
    Status {
        reply: Sender<CallStatus>,
    },
    Shutdown,
}

/// Collaborators the controller needs besides the state machine.
#[derive(Clone)]
pub struct ControllerContext {
    /// Used for the automatic `AT+CMGR` after `+CMTI`.
    pub command: Arc<dyn Transport>,
    pub pending_reads: PendingReads,
    pub subscribers: Subscribers,
}

/// Cloneable front end to the controller thread.
#[derive(Clone)]
pub struct CallHandle {
    tx: Sender<ControllerMessage>,
}

impl CallHandle {
    pub fn dial(&self, number: &str) -> Result<CallState> {
        self.command(CallCommand::Dial(number.to_string()))
    }

    pub fn answer(&self) -> Result<CallState> {
        self.command(CallCommand::Answer)
    }

    pub fn end_call(&self) -> Result<CallState> {
        self.command(CallCommand::EndCall)
    }

    /// Send a command and wait for the resulting state.
    pub fn command(&self, command: CallCommand) -> Result<CallState> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(ControllerMessage::Command { command, reply })
            .map_err(|_| controller_stopped())?;
        rx.recv().map_err(|_| controller_stopped())?
    }

    pub fn status(&self) -> Result<CallStatus> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(ControllerMessage::Status { reply })
            .map_err(|_| controller_stopped())?;
        rx.recv().map_err(|_| controller_stopped())
    }

    /// Forward a dispatched event. Returns `false` once the controller is gone.
    pub fn notify(&self, event: UnsolicitedEvent) -> bool {
        self.tx.send(ControllerMessage::Event(event)).is_ok()
    }
}

fn controller_stopped() -> SimvoiceError {
    SimvoiceError::Other("call controller is not running".to_string())
}

/// Owns the controller thread.
pub struct CallController {
    handle: CallHandle,
    thread: Option<JoinHandle<()>>,
}

impl CallController {
    pub fn spawn<R>(machine: CallStateMachine<R>, context: ControllerContext) -> Result<Self>
    where
        R: RelayControl + 'static,
    {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("call-controller".to_string())
            .spawn(move || run(machine, rx, context))
            .map_err(|e| SimvoiceError::Other(format!("Failed to spawn call controller: {}", e)))?;

        Ok(Self {
            handle: CallHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Hang up any call, stop the relay and join the thread.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.tx.send(ControllerMessage::Shutdown).is_err() {
            tracing::debug!("Call controller already exited");
        }
        if thread.join().is_err() {
            tracing::error!("Call controller thread panicked");
        }
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<R: RelayControl>(
    mut machine: CallStateMachine<R>,
    rx: Receiver<ControllerMessage>,
    context: ControllerContext,
) {
    for message in rx.iter() {
        let before = machine.state().clone();

        match message {
            ControllerMessage::Command { command, reply } => {
                let result = machine
                    .handle_command(command)
                    .map(|()| machine.state().clone());
                publish_if_changed(&before, &machine, &context);
                if reply.send(result).is_err() {
                    tracing::debug!("Command requester went away");
                }
            }
            ControllerMessage::Event(event) => {
                handle_event(&mut machine, &context, event);
                publish_if_changed(&before, &machine, &context);
            }
            ControllerMessage::Status { reply } => {
                let status = CallStatus {
                    state: before,
                    relay_active: machine.relay_active(),
                };
                if reply.send(status).is_err() {
                    tracing::debug!("Status requester went away");
                }
            }
            ControllerMessage::Shutdown => {
                machine.terminate();
                publish_if_changed(&before, &machine, &context);
                break;
            }
        }
    }
    tracing::debug!("Call controller stopped");
}

fn handle_event<R: RelayControl>(
    machine: &mut CallStateMachine<R>,
    context: &ControllerContext,
    event: UnsolicitedEvent,
) {
    match &event {
        UnsolicitedEvent::IncomingCallRinging
        | UnsolicitedEvent::RemoteCallEnded
        | UnsolicitedEvent::CallConnected
        | UnsolicitedEvent::CallDisconnected => machine.handle_event(&event),
        UnsolicitedEvent::CallerIdAvailable { number } => {
            machine.handle_event(&event);
            if matches!(machine.state(), CallState::Ringing { .. }) {
                context.subscribers.publish(ModemEvent::CallerId {
                    number: number.clone(),
                });
            }
        }
        UnsolicitedEvent::CallWaitingStatus { enabled } => {
            context
                .subscribers
                .publish(ModemEvent::CallWaiting { enabled: *enabled });
        }
        UnsolicitedEvent::NewStoredMessage { index } => {
            tracing::info!("New message stored at index {}", index);
            // The expectation must exist before the response can arrive.
            context.pending_reads.push(*index);
            let read = commands::read_sms(*index);
            if let Err(e) = context.command.send(&read) {
                tracing::warn!("Failed to request message {}: {}", index, e);
                context.pending_reads.remove(*index);
            }
        }
        UnsolicitedEvent::ImmediateSmsReceived { .. } | UnsolicitedEvent::StoredSmsRead { .. } => {
            match SmsMessage::from_event(&event) {
                Some(message) => {
                    tracing::info!("SMS from {}", message.sender);
                    context
                        .subscribers
                        .publish(ModemEvent::SmsReceived { message });
                }
                None => tracing::warn!("Dropping message read without a known index"),
            }
        }
    }
}

fn publish_if_changed<R: RelayControl>(
    before: &CallState,
    machine: &CallStateMachine<R>,
    context: &ControllerContext,
) {
    let after = machine.state();
    if after != before {
        tracing::debug!("Call state {} -> {}", before, after);
        context.subscribers.publish(ModemEvent::CallStateChanged {
            state: after.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::state::CallTiming;
    use crate::protocol::sms::SmsProvenance;
    use crate::transport::MockTransport;
    use std::time::Duration;

    #[derive(Default)]
    struct NullRelay {
        active: bool,
    }

    impl RelayControl for NullRelay {
        fn start(&mut self) -> Result<()> {
            self.active = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.active = false;
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    struct Fixture {
        controller: CallController,
        command: MockTransport,
        pending_reads: PendingReads,
        events: Receiver<ModemEvent>,
    }

    fn fixture() -> Fixture {
        fixture_with(MockTransport::new("command"))
    }

    fn fixture_with(command: MockTransport) -> Fixture {
        let audio = MockTransport::new("audio");
        let machine = CallStateMachine::new(
            Arc::new(command.clone()),
            Arc::new(audio),
            NullRelay::default(),
        )
        .with_timing(CallTiming::immediate());

        let subscribers = Subscribers::new();
        let events = subscribers.subscribe();
        let pending_reads = PendingReads::new();
        let context = ControllerContext {
            command: Arc::new(command.clone()),
            pending_reads: pending_reads.clone(),
            subscribers,
        };
        let controller = CallController::spawn(machine, context).unwrap();

        Fixture {
            controller,
            command,
            pending_reads,
            events,
        }
    }

    fn next_event(rx: &Receiver<ModemEvent>) -> ModemEvent {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("expected a modem event")
    }

    #[test]
    fn test_dial_and_hangup_through_handle() {
        let f = fixture();
        let handle = f.controller.handle();

        assert_eq!(handle.dial("+15551234").unwrap(), CallState::Active);
        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallStateChanged {
                state: CallState::Active
            }
        );

        let status = handle.status().unwrap();
        assert!(status.relay_active);

        assert_eq!(handle.end_call().unwrap(), CallState::Idle);
        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallStateChanged {
                state: CallState::Idle
            }
        );
    }

    #[test]
    fn test_rejected_command_publishes_nothing() {
        let f = fixture();
        let handle = f.controller.handle();

        assert!(handle.end_call().is_err());
        assert!(handle.answer().is_err());
        assert!(f.events.try_recv().is_err());
        assert!(f.command.written().is_empty());
    }

    #[test]
    fn test_incoming_call_events_drive_state() {
        let f = fixture();
        let handle = f.controller.handle();

        assert!(handle.notify(UnsolicitedEvent::IncomingCallRinging));
        assert!(handle.notify(UnsolicitedEvent::CallerIdAvailable {
            number: "+491701234567".to_string()
        }));

        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallStateChanged {
                state: CallState::Ringing {
                    caller_number: None
                }
            }
        );
        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallerId {
                number: "+491701234567".to_string()
            }
        );
        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallStateChanged {
                state: CallState::Ringing {
                    caller_number: Some("+491701234567".to_string())
                }
            }
        );
        assert!(handle.answer().is_ok());
    }

    #[test]
    fn test_new_stored_message_triggers_read() {
        let f = fixture();
        let handle = f.controller.handle();

        handle.notify(UnsolicitedEvent::NewStoredMessage { index: 7 });
        // Status is answered after the event, so the read has been sent.
        handle.status().unwrap();

        assert_eq!(f.command.sent_lines(), vec!["AT+CMGR=7"]);
        assert_eq!(f.pending_reads.pop(), Some(7));
    }

    #[test]
    fn test_failed_automatic_read_is_withdrawn() {
        let f = fixture_with(MockTransport::new("command").with_write_failure());
        let handle = f.controller.handle();

        handle.notify(UnsolicitedEvent::NewStoredMessage { index: 7 });
        handle.status().unwrap();

        assert!(f.pending_reads.is_empty());
    }

    #[test]
    fn test_sms_events_are_published_as_messages() {
        let f = fixture();
        let handle = f.controller.handle();

        handle.notify(UnsolicitedEvent::StoredSmsRead {
            index: Some(3),
            sender: "+15551234".to_string(),
            timestamp: "24/01/02,09:00:00+00".to_string(),
            body: "Hello".to_string(),
        });

        match next_event(&f.events) {
            ModemEvent::SmsReceived { message } => {
                assert_eq!(message.provenance, SmsProvenance::Stored { index: 3 });
                assert_eq!(message.text, "Hello");
            }
            other => panic!("Expected SmsReceived, got {:?}", other),
        }
    }

    #[test]
    fn test_call_waiting_status_is_published() {
        let f = fixture();
        f.controller
            .handle()
            .notify(UnsolicitedEvent::CallWaitingStatus { enabled: true });
        assert_eq!(
            next_event(&f.events),
            ModemEvent::CallWaiting { enabled: true }
        );
    }

    #[test]
    fn test_shutdown_hangs_up_and_is_idempotent() {
        let mut f = fixture();
        let handle = f.controller.handle();
        handle.dial("+1").unwrap();
        f.command.clear_written();

        f.controller.shutdown();
        f.controller.shutdown();

        assert_eq!(f.command.sent_lines(), vec!["AT+CHUP", "AT+CPCMREG=0,1"]);
        assert!(handle.status().is_err(), "controller should be gone");
    }
}
