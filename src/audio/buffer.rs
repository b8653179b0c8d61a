//! Playback queue between the inbound relay thread and the output device.

use crate::defaults;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Buffer shared between the relay's inbound thread and the sink callback.
pub type SharedRelayBuffer = Arc<Mutex<RelayBuffer>>;

/// Duration-bounded queue of PCM samples.
///
/// Latency is bounded by the ceiling: if the queue already holds at least
/// the ceiling's worth of audio when new data arrives, everything queued is
/// discarded before the new data is appended. Dropping wholesale instead of
/// trimming keeps the newest audio contiguous.
#[derive(Debug, Clone)]
pub struct RelayBuffer {
    samples: VecDeque<i16>,
    ceiling: usize,
    sample_rate: u32,
    dropped: u64,
}

impl RelayBuffer {
    pub fn new(max_buffer_ms: u32, sample_rate: u32) -> Self {
        let ceiling = (sample_rate as usize * max_buffer_ms as usize) / 1000;
        Self {
            samples: VecDeque::with_capacity(ceiling * 2),
            ceiling: ceiling.max(1),
            sample_rate,
            dropped: 0,
        }
    }

    pub fn shared(max_buffer_ms: u32, sample_rate: u32) -> SharedRelayBuffer {
        Arc::new(Mutex::new(Self::new(max_buffer_ms, sample_rate)))
    }

    /// Queue a frame, first clearing the queue if it is at the ceiling.
    ///
    /// Returns how many samples were discarded.
    pub fn push(&mut self, frame: &[i16]) -> usize {
        let mut discarded = 0;
        if self.samples.len() >= self.ceiling {
            discarded = self.samples.len();
            self.samples.clear();
            self.dropped += discarded as u64;
        }
        self.samples.extend(frame);
        discarded
    }

    /// Move up to `out.len()` samples into `out`; returns how many were written.
    pub fn pop_into(&mut self, out: &mut [i16]) -> usize {
        let n = out.len().min(self.samples.len());
        for (slot, sample) in out.iter_mut().zip(self.samples.drain(..n)) {
            *slot = sample;
        }
        n
    }

    /// Take up to `max` samples.
    pub fn take(&mut self, max: usize) -> Vec<i16> {
        let n = max.min(self.samples.len());
        self.samples.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn buffered_duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Total samples discarded by the ceiling since creation.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for RelayBuffer {
    fn default() -> Self {
        Self::new(defaults::MAX_BUFFER_MS, defaults::SAMPLE_RATE)
    }
}
