use crate::audio::buffer::SharedRelayBuffer;
use crate::error::{Result, SimvoiceError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// Samples are 8 kHz mono; implementations convert from the device format.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// The next captured frame; empty when none is ready.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Trait for audio output devices.
///
/// A started sink pulls from `buffer` on its own schedule (usually a device
/// callback) and keeps `playing` set while it is outputting received audio.
pub trait AudioSink: Send {
    fn start(&mut self, buffer: SharedRelayBuffer, playing: Arc<AtomicBool>) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Opens a fresh source and sink for every call.
pub trait DeviceProvider: Send + Sync {
    fn open_source(&self) -> Result<Box<dyn AudioSource>>;

    fn open_sink(&self) -> Result<Box<dyn AudioSink>>;
}

#[derive(Debug, Default)]
struct MockSourceState {
    started: bool,
    start_count: usize,
    frames: VecDeque<Vec<i16>>,
}

/// Mock audio source for testing.
///
/// Yields queued frames one per read, then empty reads. Clones share state
/// so a test can keep feeding frames after handing a clone away.
#[derive(Debug, Clone, Default)]
pub struct MockAudioSource {
    state: Arc<Mutex<MockSourceState>>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self {
            error_message: "mock audio error".to_string(),
            ..Self::default()
        }
    }

    /// Configure the mock to return these frames in order
    pub fn with_frames(self, frames: Vec<Vec<i16>>) -> Self {
        for frame in frames {
            self.push_frame(frame);
        }
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn push_frame(&self, frame: Vec<i16>) {
        if let Ok(mut state) = self.state.lock() {
            state.frames.push_back(frame);
        }
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.state.lock().map(|s| s.started).unwrap_or(false)
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().map(|s| s.start_count).unwrap_or(0)
    }

    pub fn remaining_frames(&self) -> usize {
        self.state.lock().map(|s| s.frames.len()).unwrap_or(0)
    }

    fn error(&self) -> SimvoiceError {
        SimvoiceError::AudioCapture {
            message: self.error_message.clone(),
        }
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(self.error());
        }
        let mut state = self.state.lock().map_err(|_| self.error())?;
        state.started = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| self.error())?;
        state.started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(self.error());
        }
        let mut state = self.state.lock().map_err(|_| self.error())?;
        Ok(state.frames.pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
struct MockSinkState {
    started: bool,
    buffer: Option<SharedRelayBuffer>,
    playing: Option<Arc<AtomicBool>>,
}

/// Mock audio sink for testing.
///
/// Nothing drains the buffer on its own; call [`MockAudioSink::pull`] to
/// simulate a device callback.
#[derive(Clone, Default)]
pub struct MockAudioSink {
    state: Arc<Mutex<MockSinkState>>,
    should_fail_start: bool,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().map(|s| s.started).unwrap_or(false)
    }

    /// Play up to `max` samples the way a device callback would.
    pub fn pull(&self, max: usize) -> Vec<i16> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let (Some(buffer), Some(playing)) = (&state.buffer, &state.playing) else {
            return Vec::new();
        };
        let samples = buffer.lock().map(|mut b| b.take(max)).unwrap_or_default();
        playing.store(!samples.is_empty(), Ordering::SeqCst);
        samples
    }

    /// Samples currently queued for playback.
    pub fn queued(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.buffer.as_ref().and_then(|b| b.lock().ok().map(|b| b.len())))
            .unwrap_or(0)
    }
}

impl AudioSink for MockAudioSink {
    fn start(&mut self, buffer: SharedRelayBuffer, playing: Arc<AtomicBool>) -> Result<()> {
        if self.should_fail_start {
            return Err(SimvoiceError::AudioPlayback {
                message: "mock playback error".to_string(),
            });
        }
        let mut state = self.state.lock().map_err(|e| SimvoiceError::AudioPlayback {
            message: format!("Failed to lock sink state: {}", e),
        })?;
        state.started = true;
        state.buffer = Some(buffer);
        state.playing = Some(playing);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().map_err(|e| SimvoiceError::AudioPlayback {
            message: format!("Failed to lock sink state: {}", e),
        })?;
        state.started = false;
        if let Some(playing) = state.playing.take() {
            playing.store(false, Ordering::SeqCst);
        }
        state.buffer = None;
        Ok(())
    }
}

/// Hands out clones of one mock source and sink.
#[derive(Clone, Default)]
pub struct MockDeviceProvider {
    pub source: MockAudioSource,
    pub sink: MockAudioSink,
    missing_device: bool,
}

impl MockDeviceProvider {
    pub fn new(source: MockAudioSource, sink: MockAudioSink) -> Self {
        Self {
            source,
            sink,
            missing_device: false,
        }
    }

    /// Configure the provider to report no input device
    pub fn with_missing_device(mut self) -> Self {
        self.missing_device = true;
        self
    }
}

impl DeviceProvider for MockDeviceProvider {
    fn open_source(&self) -> Result<Box<dyn AudioSource>> {
        if self.missing_device {
            return Err(SimvoiceError::AudioDeviceNotFound {
                device: "mock".to_string(),
            });
        }
        Ok(Box::new(self.source.clone()))
    }

    fn open_sink(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(self.sink.clone()))
    }
}
