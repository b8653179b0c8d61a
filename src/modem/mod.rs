//! One modem session: transports, dispatcher thread, call controller and
//! the SMS and supplementary-service operations.
//!
//! Results of queries (`+CMGR`, `+CMGL`, `+CCWA`) arrive asynchronously on
//! the command channel and are delivered to subscribers as [`ModemEvent`]s.
//! Commands are paced with fixed delays rather than waiting for `OK`.

pub mod events;

use crate::audio::device::DeviceProvider;
use crate::audio::relay::{AudioRelay, RelayController, RelaySettings};
use crate::call::{
    CallController, CallHandle, CallState, CallStateMachine, CallStatus, CallTiming,
    ControllerContext,
};
use crate::config::Config;
use crate::error::{Result, SimvoiceError};
use crate::protocol::commands::{self, ForwardReason};
use crate::protocol::dispatcher::{PendingReads, UrcDispatcher};
use crate::transport::{ChunkReceiver, Transport};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use events::{ModemEvent, Subscribers};

/// How often the dispatcher thread checks for shutdown while idle.
const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// Which stored messages an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmsSelector {
    Index { index: u32 },
    All,
}

/// Everything a session needs from the outside.
pub struct ModemParts {
    pub command: Arc<dyn Transport>,
    pub command_rx: ChunkReceiver,
    pub audio: Arc<dyn Transport>,
    pub audio_rx: ChunkReceiver,
    pub devices: Arc<dyn DeviceProvider>,
}

#[cfg(feature = "serial")]
impl ModemParts {
    /// Open both serial ports of `ports`.
    pub fn open_serial(
        config: &crate::config::ModemConfig,
        ports: &crate::transport::PortPair,
        devices: Arc<dyn DeviceProvider>,
    ) -> Result<Self> {
        use crate::transport::serial::SerialTransport;

        let capacity = crate::defaults::CHUNK_CHANNEL_CAPACITY;
        let (command, command_rx) = SerialTransport::open(&ports.command, config.baud_rate, capacity)?;
        let (audio, audio_rx) =
            SerialTransport::open(&ports.audio, config.audio_baud_rate, capacity)?;
        tracing::info!("Opened command port {} and audio port {}", ports.command, ports.audio);

        Ok(Self {
            command: Arc::new(command),
            command_rx,
            audio: Arc::new(audio),
            audio_rx,
            devices,
        })
    }
}

/// A running modem session.
pub struct Modem {
    config: Config,
    command: Arc<dyn Transport>,
    audio: Arc<dyn Transport>,
    calls: CallHandle,
    controller: Mutex<CallController>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatching: Arc<AtomicBool>,
    pending_reads: PendingReads,
    subscribers: Subscribers,
    // Serializes multi-write operations such as AT+CMGS + body.
    command_lock: Mutex<()>,
    shut_down: AtomicBool,
}

impl Modem {
    /// Wire up a session. Call [`Modem::initialize`] before use.
    pub fn start(config: Config, parts: ModemParts) -> Result<Self> {
        let ModemParts {
            command,
            command_rx,
            audio,
            audio_rx,
            devices,
        } = parts;

        let pending_reads = PendingReads::new();
        let subscribers = Subscribers::new();

        let relay = AudioRelay::new(
            Arc::clone(&audio),
            audio_rx,
            RelaySettings::from(&config.audio),
        );
        let machine = CallStateMachine::new(
            Arc::clone(&command),
            Arc::clone(&audio),
            RelayController::new(relay, devices),
        )
        .with_timing(CallTiming {
            settle: config.modem.settle(),
            pacing: config.modem.pacing(),
        });

        let controller = CallController::spawn(
            machine,
            ControllerContext {
                command: Arc::clone(&command),
                pending_reads: pending_reads.clone(),
                subscribers: subscribers.clone(),
            },
        )?;
        let calls = controller.handle();

        let dispatching = Arc::new(AtomicBool::new(true));
        let dispatcher = {
            let dispatcher = UrcDispatcher::new().with_pending_reads(pending_reads.clone());
            let calls = calls.clone();
            let running = Arc::clone(&dispatching);
            thread::Builder::new()
                .name("urc-dispatcher".to_string())
                .spawn(move || dispatch_loop(dispatcher, command_rx, calls, running))
                .map_err(|e| SimvoiceError::Other(format!("Failed to spawn dispatcher: {}", e)))?
        };

        Ok(Self {
            config,
            command,
            audio,
            calls,
            controller: Mutex::new(controller),
            dispatcher: Mutex::new(Some(dispatcher)),
            dispatching,
            pending_reads,
            subscribers,
            command_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Send the setup sequence: text mode, character set, SMS parameters,
    /// message indication, caller id and the configured audio settings.
    pub fn initialize(&self) -> Result<()> {
        let _guard = self.lock_commands()?;
        for command in commands::setup_sequence(&self.config.modem) {
            self.write(&command)?;
        }
        tracing::info!("Modem initialized");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dial(&self, number: &str) -> Result<CallState> {
        self.calls.dial(number)
    }

    pub fn answer(&self) -> Result<CallState> {
        self.calls.answer()
    }

    pub fn end_call(&self) -> Result<CallState> {
        self.calls.end_call()
    }

    pub fn call_state(&self) -> Result<CallState> {
        Ok(self.calls.status()?.state)
    }

    pub fn status(&self) -> Result<CallStatus> {
        self.calls.status()
    }

    /// Send a text message.
    ///
    /// The body follows the `>` prompt after a fixed pacing delay and is
    /// terminated with Ctrl-Z.
    pub fn send_sms(&self, recipient: &str, body: &str) -> Result<()> {
        let open = commands::send_sms(recipient)?;
        let payload = commands::sms_body(body)?;

        let _guard = self.lock_commands()?;
        self.write(&open)?;
        tracing::debug!(port = self.command.name(), "TX <{} byte body>", payload.len());
        self.command.send_raw(&payload)?;
        self.pace();
        tracing::info!("SMS sent to {}", recipient.trim());
        Ok(())
    }

    /// Request stored messages; they arrive as [`ModemEvent::SmsReceived`].
    pub fn read_sms(&self, selector: SmsSelector) -> Result<()> {
        let _guard = self.lock_commands()?;
        match selector {
            SmsSelector::Index { index } => {
                self.pending_reads.push(index);
                let result = self.write(&commands::read_sms(index));
                if result.is_err() {
                    self.pending_reads.remove(index);
                }
                result
            }
            SmsSelector::All => self.write(commands::LIST_ALL_SMS),
        }
    }

    pub fn list_sms(&self) -> Result<()> {
        self.read_sms(SmsSelector::All)
    }

    pub fn delete_sms(&self, selector: SmsSelector) -> Result<()> {
        let _guard = self.lock_commands()?;
        match selector {
            SmsSelector::Index { index } => self.write(&commands::delete_sms(index)),
            SmsSelector::All => self.write(commands::DELETE_ALL_SMS),
        }
    }

    pub fn set_call_waiting(&self, enabled: bool) -> Result<()> {
        let _guard = self.lock_commands()?;
        self.write(&commands::set_call_waiting(enabled))
    }

    /// Ask for the call-waiting status; it arrives as [`ModemEvent::CallWaiting`].
    pub fn query_call_waiting(&self) -> Result<()> {
        let _guard = self.lock_commands()?;
        self.write(commands::QUERY_CALL_WAITING)
    }

    pub fn set_call_forwarding(
        &self,
        reason: ForwardReason,
        enabled: bool,
        number: Option<&str>,
    ) -> Result<()> {
        let command = commands::set_call_forwarding(reason, enabled, number)?;
        let _guard = self.lock_commands()?;
        self.write(&command)
    }

    pub fn subscribe(&self) -> Receiver<ModemEvent> {
        self.subscribers.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Tear the session down. Repeated calls are no-ops.
    ///
    /// Order: controller (hangs up, stops the relay), audio port,
    /// subscribers, command port, dispatcher thread.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down modem session");

        match self.controller.lock() {
            Ok(mut controller) => controller.shutdown(),
            Err(e) => tracing::error!("Call controller lock poisoned: {}", e),
        }
        self.audio.close();
        self.subscribers.clear();
        self.command.close();

        self.dispatching.store(false, Ordering::SeqCst);
        let dispatcher = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(dispatcher) = dispatcher
            && dispatcher.join().is_err()
        {
            tracing::error!("Dispatcher thread panicked");
        }
    }

    fn lock_commands(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        if self.is_shut_down() {
            return Err(SimvoiceError::transport("modem session is shut down"));
        }
        self.command_lock
            .lock()
            .map_err(|e| SimvoiceError::Other(format!("Command lock poisoned: {}", e)))
    }

    fn write(&self, command: &str) -> Result<()> {
        tracing::debug!(port = self.command.name(), "TX {}", command);
        self.command.send(command)?;
        self.pace();
        Ok(())
    }

    fn pace(&self) {
        let pacing = self.config.modem.pacing();
        if !pacing.is_zero() {
            thread::sleep(pacing);
        }
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(
    mut dispatcher: UrcDispatcher,
    rx: ChunkReceiver,
    calls: CallHandle,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let chunk = match rx.recv_timeout(DISPATCH_POLL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        tracing::trace!("RX {:?}", String::from_utf8_lossy(&chunk));

        for event in dispatcher.dispatch(&chunk) {
            tracing::debug!("URC {:?}", event);
            if !calls.notify(event) {
                tracing::debug!("Call controller gone, dispatcher exiting");
                return;
            }
        }
    }
    tracing::debug!("Dispatcher stopped");
}
