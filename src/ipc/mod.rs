//! Unix socket IPC between the CLI and the daemon.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{follow, send_command};
pub use protocol::{CallWaitingMode, Command, DaemonEvent, Response};
pub use server::{CommandHandler, IpcServer};
