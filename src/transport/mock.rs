//! In-memory transport for tests and dry runs.

use crate::defaults;
use crate::error::{Result, SimvoiceError};
use crate::transport::{ChunkReceiver, ChunkSender, Transport};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock transport that records every write.
///
/// Clones share the same log, so a test can keep one clone for assertions
/// while the code under test owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    name: String,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    discards: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    should_fail_write: bool,
    incoming: ChunkSender,
    incoming_rx: ChunkReceiver,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new(name: &str) -> Self {
        let (incoming, incoming_rx) = unbounded();
        Self {
            name: name.to_string(),
            written: Arc::new(Mutex::new(Vec::new())),
            discards: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            should_fail_write: false,
            incoming,
            incoming_rx,
        }
    }

    /// Configure the mock to fail every write
    pub fn with_write_failure(mut self) -> Self {
        self.should_fail_write = true;
        self
    }

    /// Receiver the consumer reads modem output from
    pub fn receiver(&self) -> ChunkReceiver {
        self.incoming_rx.clone()
    }

    /// Simulate the modem emitting bytes
    pub fn inject(&self, bytes: &[u8]) {
        // Receiver is held by `self`, so the send cannot fail.
        let _ = self.incoming.send(bytes.to_vec());
    }

    /// Every write, in order, as raw bytes
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Every write decoded as text with line terminators stripped
    pub fn sent_lines(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_end_matches(defaults::LINE_TERMINATOR)
                    .to_string()
            })
            .collect()
    }

    /// Forget recorded writes
    pub fn clear_written(&self) {
        if let Ok(mut written) = self.written.lock() {
            written.clear();
        }
    }

    /// Number of `discard_buffers` calls
    pub fn discard_count(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    /// Check if the transport was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, bytes: Vec<u8>) -> Result<()> {
        if self.should_fail_write {
            return Err(SimvoiceError::transport(format!(
                "mock write failure on {}",
                self.name
            )));
        }
        if self.is_closed() {
            return Err(SimvoiceError::transport(format!("{} is closed", self.name)));
        }
        self.written
            .lock()
            .map_err(|e| SimvoiceError::transport(format!("Failed to lock write log: {}", e)))?
            .push(bytes);
        Ok(())
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, text: &str) -> Result<()> {
        let mut line = text.as_bytes().to_vec();
        line.extend_from_slice(defaults::LINE_TERMINATOR.as_bytes());
        self.record(line)
    }

    fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        self.record(bytes.to_vec())
    }

    fn discard_buffers(&self) -> Result<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_appends_line_terminator() {
        let transport = MockTransport::new("cmd");
        transport.send("ATA").unwrap();

        assert_eq!(transport.written(), vec![b"ATA\r\n".to_vec()]);
        assert_eq!(transport.sent_lines(), vec!["ATA".to_string()]);
    }

    #[test]
    fn test_send_raw_writes_verbatim() {
        let transport = MockTransport::new("cmd");
        transport.send_raw(&[b'h', b'i', 0x1A]).unwrap();

        assert_eq!(transport.written(), vec![vec![b'h', b'i', 0x1A]]);
    }

    #[test]
    fn test_clones_share_write_log() {
        let transport = MockTransport::new("cmd");
        let observer = transport.clone();
        transport.send("AT+CHUP").unwrap();

        assert_eq!(observer.sent_lines(), vec!["AT+CHUP".to_string()]);
    }

    #[test]
    fn test_write_failure_is_transport_error() {
        let transport = MockTransport::new("cmd").with_write_failure();
        match transport.send("ATA") {
            Err(SimvoiceError::Transport { message }) => {
                assert!(message.contains("cmd"));
            }
            other => panic!("Expected Transport error, got {:?}", other),
        }
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_writes_after_close_fail() {
        let transport = MockTransport::new("cmd");
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.send("ATA").is_err());
    }

    #[test]
    fn test_inject_reaches_receiver() {
        let transport = MockTransport::new("cmd");
        let rx = transport.receiver();
        transport.inject(b"RING\r\n");

        assert_eq!(rx.try_recv().unwrap(), b"RING\r\n".to_vec());
    }

    #[test]
    fn test_discard_count() {
        let transport = MockTransport::new("audio");
        transport.discard_buffers().unwrap();
        transport.discard_buffers().unwrap();
        assert_eq!(transport.discard_count(), 2);
    }
}
