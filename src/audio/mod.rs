//! Host audio and the call audio relay.

pub mod buffer;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod convert;
pub mod device;
pub mod gain;
pub mod relay;

pub use buffer::{RelayBuffer, SharedRelayBuffer};
pub use device::{AudioSink, AudioSource, DeviceProvider};
pub use relay::{AudioRelay, RelayController, RelayHandle, RelaySettings};
