//! Default configuration constants for simvoice.
//!
//! Shared by the config layer, the modem session and the audio relay so
//! the timing constants live in one place.

/// Sample rate of the modem's PCM audio channel in Hz.
///
/// The voice channel is fixed at 8 kHz mono 16-bit; the format is not
/// negotiated with the modem.
pub const SAMPLE_RATE: u32 = 8000;

/// Bytes per PCM sample (16-bit little endian).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Baud rate of the AT command port.
pub const COMMAND_BAUD_RATE: u32 = 115_200;

/// Baud rate of the PCM audio port.
///
/// 8 kHz mono 16-bit needs 128 kbit/s of payload, so the audio port runs
/// well above the command port.
pub const AUDIO_BAUD_RATE: u32 = 921_600;

/// Settle interval before dialing or answering, in milliseconds.
///
/// Buffers on both ports are discarded first, then the modem is given
/// this long before the call command goes out.
pub const SETTLE_MS: u64 = 500;

/// Pause after every command write, in milliseconds.
///
/// Commands are paced with a fixed delay instead of waiting for `OK`.
pub const COMMAND_PACING_MS: u64 = 100;

/// Ceiling for buffered playback audio, in milliseconds.
///
/// When the relay buffer holds at least this much audio as new data
/// arrives, it is cleared before the new data is appended.
pub const MAX_BUFFER_MS: u32 = 100;

/// Samples per captured frame: 20 ms at 8 kHz.
pub const FRAME_SAMPLES: usize = 160;

/// Gain applied to captured audio while the local speaker is playing.
pub const ECHO_SUPPRESSION: f32 = 0.3;

/// Polling interval of the relay threads when no data is available.
pub const POLL_INTERVAL_MS: u64 = 5;

/// Capacity of the chunk channel between a transport reader and its consumer.
pub const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Size of a single serial read.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Terminator written after the SMS body (Ctrl-Z).
pub const SMS_TERMINATOR: u8 = 0x1A;

/// Line terminator appended by `Transport::send`.
pub const LINE_TERMINATOR: &str = "\r\n";
