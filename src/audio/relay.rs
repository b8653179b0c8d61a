//! Duplex PCM relay between host audio devices and the modem's audio port.
//!
//! Two threads run while a call is active:
//!
//! - capture: [`AudioSource`] → gain → little-endian bytes → audio transport
//! - inbound: audio transport → i16 decode → [`RelayBuffer`] → [`AudioSink`]
//!
//! The only state shared across the audio contexts is the playback flag and
//! the relay buffer.

use crate::audio::buffer::{RelayBuffer, SharedRelayBuffer};
use crate::audio::convert::{PcmDecoder, samples_to_le_bytes};
use crate::audio::device::{AudioSink, AudioSource, DeviceProvider};
use crate::audio::gain::{apply_gain, echo_gain};
use crate::call::state::RelayControl;
use crate::config::AudioConfig;
use crate::defaults;
use crate::error::{Result, SimvoiceError};
use crate::transport::{ChunkReceiver, Transport};
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Relay tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaySettings {
    /// Capture gain while the speaker is playing, in (0, 1].
    pub echo_suppression: f32,
    pub max_buffer_ms: u32,
    pub poll_interval: Duration,
    pub sample_rate: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            echo_suppression: defaults::ECHO_SUPPRESSION,
            max_buffer_ms: defaults::MAX_BUFFER_MS,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl From<&AudioConfig> for RelaySettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            echo_suppression: config.echo_suppression,
            max_buffer_ms: config.max_buffer_ms,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// The audio port's two directions, ready to be relayed.
pub struct AudioRelay {
    transport: Arc<dyn Transport>,
    inbound: ChunkReceiver,
    settings: RelaySettings,
}

impl AudioRelay {
    pub fn new(transport: Arc<dyn Transport>, inbound: ChunkReceiver, settings: RelaySettings) -> Self {
        Self {
            transport,
            inbound,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Start both directions.
    ///
    /// Audio received before the call is discarded first. If either device
    /// fails to start, whatever was started is stopped again.
    pub fn start(
        &self,
        mut source: Box<dyn AudioSource>,
        mut sink: Box<dyn AudioSink>,
    ) -> Result<RelayHandle> {
        let stale = self.inbound.try_iter().count();
        if stale > 0 {
            tracing::debug!("Discarded {} stale audio chunks", stale);
        }

        let buffer = RelayBuffer::shared(self.settings.max_buffer_ms, self.settings.sample_rate);
        let playing = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        sink.start(Arc::clone(&buffer), Arc::clone(&playing))?;
        if let Err(e) = source.start() {
            if let Err(stop_err) = sink.stop() {
                tracing::warn!("Failed to stop playback after capture error: {}", stop_err);
            }
            return Err(e);
        }

        let capture = {
            let running = Arc::clone(&running);
            let playing = Arc::clone(&playing);
            let transport = Arc::clone(&self.transport);
            let settings = self.settings;
            thread::Builder::new()
                .name("relay-capture".to_string())
                .spawn(move || capture_loop(source, transport, running, playing, settings))
        };
        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                if let Err(stop_err) = sink.stop() {
                    tracing::warn!("Failed to stop playback: {}", stop_err);
                }
                return Err(SimvoiceError::AudioCapture {
                    message: format!("Failed to spawn capture thread: {}", e),
                });
            }
        };

        let inbound = {
            let running = Arc::clone(&running);
            let buffer = Arc::clone(&buffer);
            let rx = self.inbound.clone();
            let poll = self.settings.poll_interval;
            thread::Builder::new()
                .name("relay-inbound".to_string())
                .spawn(move || inbound_loop(rx, buffer, running, poll))
        };

        let mut handle = RelayHandle {
            running,
            playing,
            buffer,
            threads: vec![capture],
            sink: Some(sink),
        };

        match inbound {
            Ok(thread) => {
                handle.threads.push(thread);
                tracing::info!("Audio relay started");
                Ok(handle)
            }
            Err(e) => {
                handle.stop();
                Err(SimvoiceError::AudioPlayback {
                    message: format!("Failed to spawn inbound thread: {}", e),
                })
            }
        }
    }
}

fn capture_loop(
    mut source: Box<dyn AudioSource>,
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    settings: RelaySettings,
) {
    while running.load(Ordering::SeqCst) {
        match source.read_samples() {
            Ok(samples) if samples.is_empty() => thread::sleep(settings.poll_interval),
            Ok(mut samples) => {
                let gain = echo_gain(playing.load(Ordering::SeqCst), settings.echo_suppression);
                apply_gain(&mut samples, gain);
                if let Err(e) = transport.send_raw(&samples_to_le_bytes(&samples)) {
                    tracing::warn!("Audio write failed: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Audio capture read failed: {}", e);
                thread::sleep(settings.poll_interval);
            }
        }
    }

    if let Err(e) = source.stop() {
        tracing::warn!("Failed to stop audio capture: {}", e);
    }
}

fn inbound_loop(
    rx: ChunkReceiver,
    buffer: SharedRelayBuffer,
    running: Arc<AtomicBool>,
    poll: Duration,
) {
    let mut decoder = PcmDecoder::new();

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(poll) {
            Ok(bytes) => {
                let samples = decoder.decode(&bytes);
                if samples.is_empty() {
                    continue;
                }
                match buffer.lock() {
                    Ok(mut buffer) => {
                        let discarded = buffer.push(&samples);
                        if discarded > 0 {
                            tracing::trace!("Playback behind, dropped {} samples", discarded);
                        }
                    }
                    Err(e) => tracing::warn!("Relay buffer unavailable: {}", e),
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("Audio transport closed");
                break;
            }
        }
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    buffer: SharedRelayBuffer,
    threads: Vec<JoinHandle<()>>,
    sink: Option<Box<dyn AudioSink>>,
}

impl RelayHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> &SharedRelayBuffer {
        &self.buffer
    }

    /// Stop both directions and both devices. Repeated calls are no-ops.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("Audio relay thread panicked");
            }
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.stop() {
                tracing::warn!("Failed to stop playback: {}", e);
            }
            tracing::info!("Audio relay stopped");
        }
        self.playing.store(false, Ordering::SeqCst);
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts a relay with freshly opened devices on every call.
pub struct RelayController {
    relay: AudioRelay,
    devices: Arc<dyn DeviceProvider>,
    active: Option<RelayHandle>,
}

impl RelayController {
    pub fn new(relay: AudioRelay, devices: Arc<dyn DeviceProvider>) -> Self {
        Self {
            relay,
            devices,
            active: None,
        }
    }

    pub fn handle(&self) -> Option<&RelayHandle> {
        self.active.as_ref()
    }
}

impl RelayControl for RelayController {
    fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let source = self.devices.open_source()?;
        let sink = self.devices.open_sink()?;
        self.active = Some(self.relay.start(source, sink)?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.stop();
        }
    }

    fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(RelayHandle::is_running)
    }
}
