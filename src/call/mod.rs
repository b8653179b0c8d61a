//! Call lifecycle: the state machine and the thread that owns it.

pub mod controller;
pub mod state;

pub use controller::{CallController, CallHandle, CallStatus, ControllerContext};
pub use state::{CallCommand, CallState, CallStateMachine, CallTiming, RelayControl};
