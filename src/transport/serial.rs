//! Serial port transport built on the `serialport` crate.

use crate::defaults;
use crate::error::{Result, SimvoiceError};
use crate::transport::{ChunkReceiver, Transport, push_chunk};
use crossbeam_channel::bounded;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read timeout; bounds how long `close()` waits for the reader thread.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Back-off after a failed read so a flapping port does not spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A serial port with a background reader thread.
pub struct SerialTransport {
    name: String,
    writer: Mutex<Box<dyn SerialPort>>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` and start pushing received chunks.
    ///
    /// # Errors
    /// Returns `SimvoiceError::TransportUnavailable` if the port cannot be
    /// opened or cloned for reading.
    pub fn open(
        path: &str,
        baud_rate: u32,
        channel_capacity: usize,
    ) -> Result<(Self, ChunkReceiver)> {
        let unavailable = |message: String| SimvoiceError::TransportUnavailable {
            port: path.to_string(),
            message,
        };

        let port = serialport::new(path, baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|e| unavailable(format!("Failed to open serial port: {}", e)))?;

        let reader_port = port
            .try_clone()
            .map_err(|e| unavailable(format!("Failed to clone serial port: {}", e)))?;

        let (tx, rx) = bounded(channel_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let running = Arc::clone(&running);
            let name = path.to_string();
            thread::Builder::new()
                .name(format!("serial-rx {}", path))
                .spawn(move || read_loop(reader_port, name, running, tx))
                .map_err(|e| unavailable(format!("Failed to spawn reader thread: {}", e)))?
        };

        tracing::info!(port = path, baud_rate, "serial port opened");

        Ok((
            Self {
                name: path.to_string(),
                writer: Mutex::new(port),
                running,
                reader: Mutex::new(Some(reader)),
            },
            rx,
        ))
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SimvoiceError::transport(format!("{} is closed", self.name)));
        }
        let mut port = self
            .writer
            .lock()
            .map_err(|e| SimvoiceError::transport(format!("Failed to lock port: {}", e)))?;
        port.write_all(bytes)
            .and_then(|()| port.flush())
            .map_err(|e| SimvoiceError::transport(format!("Write to {} failed: {}", self.name, e)))
    }
}

/// A serial device the OS reports, for `simvoice ports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    /// `vid:pid product` for USB devices.
    pub description: Option<String>,
}

/// Serial devices currently present.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| SimvoiceError::Other(format!("Failed to enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => Some(format!(
                    "{:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                )),
                _ => None,
            };
            PortInfo {
                path: port.port_name,
                description: description.map(|d| d.trim_end().to_string()),
            }
        })
        .collect())
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    name: String,
    running: Arc<AtomicBool>,
    tx: crate::transport::ChunkSender,
) {
    let mut buf = [0u8; defaults::READ_BUFFER_SIZE];

    while running.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                tracing::trace!(port = %name, bytes = n, "rx");
                if !push_chunk(&tx, &name, buf[..n].to_vec()) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "serial read failed");
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }

    tracing::debug!(port = %name, "serial reader stopped");
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, text: &str) -> Result<()> {
        let mut line = String::with_capacity(text.len() + defaults::LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(defaults::LINE_TERMINATOR);
        self.write_all(line.as_bytes())
    }

    fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)
    }

    fn discard_buffers(&self) -> Result<()> {
        let port = self
            .writer
            .lock()
            .map_err(|e| SimvoiceError::transport(format!("Failed to lock port: {}", e)))?;
        port.clear(ClearBuffer::All).map_err(|e| {
            SimvoiceError::transport(format!("Failed to clear {} buffers: {}", self.name, e))
        })
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!(port = %self.name, "serial reader thread panicked");
        }
        tracing::info!(port = %self.name, "serial port closed");
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
