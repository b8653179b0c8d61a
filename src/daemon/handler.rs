//! Command handler implementation for the daemon.

use crate::error::Result;
use crate::ipc::protocol::{CallWaitingMode, Command, DaemonEvent, Response};
use crate::ipc::server::CommandHandler;
use crate::modem::{Modem, SmsSelector};
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// How often a follow forwarder checks whether its client went away.
const FOLLOW_POLL: Duration = Duration::from_millis(250);

/// Command handler for daemon IPC commands.
pub struct DaemonCommandHandler {
    modem: Arc<Modem>,
    shutdown: Arc<Notify>,
}

impl DaemonCommandHandler {
    /// `shutdown` is notified when a client sends [`Command::Shutdown`].
    pub fn new(modem: Arc<Modem>, shutdown: Arc<Notify>) -> Self {
        Self { modem, shutdown }
    }

    /// Run a blocking modem operation off the async runtime.
    async fn run<F>(&self, op: F) -> Response
    where
        F: FnOnce(&Modem) -> Result<()> + Send + 'static,
    {
        let modem = Arc::clone(&self.modem);
        match tokio::task::spawn_blocking(move || op(&modem)).await {
            Ok(Ok(())) => Response::Ok,
            Ok(Err(e)) => Response::error(e.to_string()),
            Err(e) => Response::error(format!("Modem task failed: {}", e)),
        }
    }

    /// Run a call command, answering with the resulting status.
    async fn call<F>(&self, op: F) -> Response
    where
        F: FnOnce(&Modem) -> Result<()> + Send + 'static,
    {
        match self.run(op).await {
            Response::Ok => self.status().await,
            other => other,
        }
    }

    async fn status(&self) -> Response {
        let modem = Arc::clone(&self.modem);
        match tokio::task::spawn_blocking(move || modem.status()).await {
            Ok(Ok(status)) => Response::Status {
                call_state: status.state,
                relay_active: status.relay_active,
            },
            Ok(Err(e)) => Response::error(e.to_string()),
            Err(e) => Response::error(format!("Modem task failed: {}", e)),
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Dial { number } => self.call(move |m| m.dial(&number).map(drop)).await,
            Command::Answer => self.call(|m| m.answer().map(drop)).await,
            Command::Hangup => self.call(|m| m.end_call().map(drop)).await,
            Command::Status => self.status().await,
            Command::SendSms { recipient, body } => {
                self.run(move |m| m.send_sms(&recipient, &body)).await
            }
            Command::ReadSms { index } => self.run(move |m| m.read_sms(selector(index))).await,
            Command::ListSms => self.run(|m| m.list_sms()).await,
            Command::DeleteSms { index } => {
                self.run(move |m| m.delete_sms(selector(index))).await
            }
            Command::CallWaiting { mode } => {
                self.run(move |m| match mode {
                    CallWaitingMode::On => m.set_call_waiting(true),
                    CallWaitingMode::Off => m.set_call_waiting(false),
                    CallWaitingMode::Query => m.query_call_waiting(),
                })
                .await
            }
            Command::CallForwarding {
                reason,
                enabled,
                number,
            } => {
                self.run(move |m| m.set_call_forwarding(reason, enabled, number.as_deref()))
                    .await
            }
            // Streaming is set up by the server through `follow`.
            Command::Follow => Response::error("follow must be the only request on a connection"),
            Command::Shutdown => {
                tracing::info!("Shutdown requested over IPC");
                self.shutdown.notify_one();
                Response::Ok
            }
        }
    }

    fn follow(&self) -> Option<mpsc::UnboundedReceiver<DaemonEvent>> {
        let events = self.modem.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        let spawned = std::thread::Builder::new()
            .name("ipc-follow".to_string())
            .spawn(move || {
                loop {
                    if tx.is_closed() {
                        return;
                    }
                    match events.recv_timeout(FOLLOW_POLL) {
                        Ok(event) => {
                            if tx.send(DaemonEvent::Modem { event }).is_err() {
                                return;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            if tx.send(DaemonEvent::Closed).is_err() {
                                tracing::debug!("Follow client left before close");
                            }
                            return;
                        }
                    }
                }
            });

        match spawned {
            Ok(_) => Some(rx),
            Err(e) => {
                tracing::error!("Failed to spawn follow forwarder: {}", e);
                None
            }
        }
    }
}

fn selector(index: Option<u32>) -> SmsSelector {
    match index {
        Some(index) => SmsSelector::Index { index },
        None => SmsSelector::All,
    }
}
