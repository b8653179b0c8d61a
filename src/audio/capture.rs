//! Host audio devices using CPAL (Cross-Platform Audio Library).

use crate::audio::buffer::SharedRelayBuffer;
use crate::audio::convert::{expand_channels, f32_to_i16, i16_to_f32, resample, to_modem_format};
use crate::audio::device::{AudioSink, AudioSource, DeviceProvider};
use crate::defaults;
use crate::error::{Result, SimvoiceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Keep JACK and PipeWire from printing while backends are probed.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a phone call.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Which side of the host audio a device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Usable device names, preferred ones marked with "\[recommended\]".
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| SimvoiceError::AudioCapture {
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    let names = devices
        .iter()
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect();
    Ok(names)
}

/// Find a device by exact name, or the best default for `direction`.
///
/// The default prefers PipeWire/PulseAudio so the desktop's selection is
/// respected, then falls back to the host default.
fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
        .map_err(|e| SimvoiceError::AudioCapture {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| SimvoiceError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let default = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        default.ok_or_else(|| SimvoiceError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the owning source or sink,
/// which is used from one thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn mono_config(sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Microphone capture at the modem's 8 kHz mono.
///
/// Tries i16/8kHz/mono, then f32/8kHz/mono, then the device's default
/// config with software conversion.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
}

impl CpalAudioSource {
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(Direction::Input, device_name)?;
        Ok(Self {
            device,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = mono_config(defaults::SAMPLE_RATE);
        let err_callback = |err| tracing::warn!("Audio input stream error: {}", err);

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| SimvoiceError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            "Using native input format ({}ch/{}Hz/{:?}), converting in software",
            channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| tracing::warn!("Audio input stream error: {}", err);
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted = to_modem_format(data, channels, native_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| SimvoiceError::AudioCapture {
                    message: format!("Failed to build native i16 input stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        let converted = to_modem_format(&i16_data, channels, native_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| SimvoiceError::AudioCapture {
                    message: format!("Failed to build native f32 input stream: {}", e),
                }),
            fmt => Err(SimvoiceError::AudioCapture {
                message: format!("Unsupported native sample format: {:?}", fmt),
            }),
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| SimvoiceError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never
        // fire the callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_stream_native()?;
            native.play().map_err(|e| SimvoiceError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| SimvoiceError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| SimvoiceError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(take_frame(&mut buffer, defaults::FRAME_SAMPLES))
    }
}

/// Remove one frame of `frame_len` samples from the front of `captured`.
///
/// Returns an empty frame while less than a full frame has accumulated.
fn take_frame(captured: &mut Vec<i16>, frame_len: usize) -> Vec<i16> {
    if frame_len == 0 || captured.len() < frame_len {
        return Vec::new();
    }
    captured.drain(..frame_len).collect()
}

/// Fill `out` from the relay buffer, zero-padding the rest.
///
/// Returns true if any received audio was written.
fn fill_from_buffer(buffer: &SharedRelayBuffer, out: &mut [i16]) -> bool {
    let written = buffer.lock().map(|mut b| b.pop_into(out)).unwrap_or(0);
    out[written..].fill(0);
    written > 0
}

/// Speaker playback of relayed audio.
pub struct CpalAudioSink {
    device: cpal::Device,
    stream: Option<SendableStream>,
}

impl CpalAudioSink {
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(Direction::Output, device_name)?;
        Ok(Self {
            device,
            stream: None,
        })
    }

    fn build_stream(
        &self,
        buffer: &SharedRelayBuffer,
        playing: &Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let config = mono_config(defaults::SAMPLE_RATE);
        let err_callback = |err| tracing::warn!("Audio output stream error: {}", err);

        let (buf, flag) = (Arc::clone(buffer), Arc::clone(playing));
        if let Ok(stream) = self.device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                flag.store(fill_from_buffer(&buf, data), Ordering::Relaxed);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let (buf, flag) = (Arc::clone(buffer), Arc::clone(playing));
        let mut scratch = Vec::new();
        if let Ok(stream) = self.device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0i16);
                flag.store(fill_from_buffer(&buf, &mut scratch), Ordering::Relaxed);
                for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                    *out = i16_to_f32(s);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native(buffer, playing)
    }

    /// Play at the device's native config, upsampling and duplicating channels.
    fn build_stream_native(
        &self,
        buffer: &SharedRelayBuffer,
        playing: &Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_output_config()
                .map_err(|e| SimvoiceError::AudioPlayback {
                    message: format!("Failed to query default output config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let channels = (default_config.channels() as usize).max(1);
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            "Using native output format ({}ch/{}Hz/{:?}), converting in software",
            channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| tracing::warn!("Audio output stream error: {}", err);

        // Render one callback's worth of native frames from modem-rate audio.
        let render = {
            let buffer = Arc::clone(buffer);
            let playing = Arc::clone(playing);
            move |native_len: usize| -> Vec<i16> {
                let frames = native_len / channels;
                let wanted = (frames as u64 * defaults::SAMPLE_RATE as u64)
                    .div_ceil(native_rate.max(1) as u64) as usize;
                let mut mono = vec![0i16; wanted];
                playing.store(fill_from_buffer(&buffer, &mut mono), Ordering::Relaxed);
                let mut upsampled = resample(&mono, defaults::SAMPLE_RATE, native_rate);
                upsampled.resize(frames, 0);
                expand_channels(&upsampled, channels)
            }
        };

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let rendered = render(data.len());
                        for (out, s) in data.iter_mut().zip(rendered.into_iter().chain(std::iter::repeat(0))) {
                            *out = s;
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| SimvoiceError::AudioPlayback {
                    message: format!("Failed to build native i16 output stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let rendered = render(data.len());
                        for (out, s) in data.iter_mut().zip(rendered.into_iter().chain(std::iter::repeat(0))) {
                            *out = i16_to_f32(s);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| SimvoiceError::AudioPlayback {
                    message: format!("Failed to build native f32 output stream: {}", e),
                }),
            fmt => Err(SimvoiceError::AudioPlayback {
                message: format!("Unsupported native sample format: {:?}", fmt),
            }),
        }
    }
}

impl AudioSink for CpalAudioSink {
    fn start(&mut self, buffer: SharedRelayBuffer, playing: Arc<AtomicBool>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream(&buffer, &playing)?;
        stream.play().map_err(|e| SimvoiceError::AudioPlayback {
            message: format!("Failed to start playback stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| SimvoiceError::AudioPlayback {
                message: format!("Failed to stop playback stream: {}", e),
            })?;
        }
        Ok(())
    }
}

/// Opens CPAL devices by configured name.
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl CpalDevices {
    pub fn from_config(config: &crate::config::AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }
}

impl DeviceProvider for CpalDevices {
    fn open_source(&self) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(CpalAudioSource::new(self.input_device.as_deref())?))
    }

    fn open_sink(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalAudioSink::new(self.output_device.as_deref())?))
    }
}
