//! Byte transports to the modem.
//!
//! A transport is written through the [`Transport`] trait and read through
//! the [`ChunkReceiver`] handed out when it is opened. Data is pushed by a
//! reader thread in arbitrarily sized chunks; consumers never poll the port.

pub mod mock;
pub mod ports;
#[cfg(feature = "serial")]
pub mod serial;

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};

pub use mock::MockTransport;
pub use ports::{ConfiguredPorts, PortPair, PortResolver};

/// A block of bytes as delivered by a transport.
///
/// Chunk boundaries carry no meaning; a protocol line may span several chunks.
pub type RawChunk = Vec<u8>;

/// Push side of a transport's receive channel.
pub type ChunkSender = Sender<RawChunk>;

/// Receive side consumed by the dispatcher or the audio relay.
pub type ChunkReceiver = Receiver<RawChunk>;

/// Write side of a serial-style link to the modem.
pub trait Transport: Send + Sync {
    /// Port identifier for log messages.
    fn name(&self) -> &str;

    /// Write a text line; the line terminator is appended.
    fn send(&self, text: &str) -> Result<()>;

    /// Write bytes verbatim.
    fn send_raw(&self, bytes: &[u8]) -> Result<()>;

    /// Discard pending data in both directions.
    fn discard_buffers(&self) -> Result<()>;

    /// Stop the reader and release the port. Repeated calls are no-ops.
    fn close(&self);
}

/// Forward a chunk without blocking the reader thread.
///
/// Returns `false` once the consumer side is gone.
pub(crate) fn push_chunk(tx: &ChunkSender, port: &str, chunk: RawChunk) -> bool {
    match tx.try_send(chunk) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            tracing::warn!(port, bytes = dropped.len(), "receive channel full, dropping chunk");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}
