//! Command-line interface for simvoice
//!
//! Provides argument parsing using clap derive macros.

use crate::ipc::protocol::CallWaitingMode;
use crate::protocol::ForwardReason;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice calls and SMS through a cellular modem
#[derive(Parser, Debug)]
#[command(
    name = "simvoice",
    version,
    about = "Voice calls and SMS through a cellular modem"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to Unix socket (default: $XDG_RUNTIME_DIR/simvoice.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: AT traffic, -vv: everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the modem daemon in the foreground
    Daemon {
        /// Serial device for AT commands (e.g., /dev/ttyUSB2)
        #[arg(long, value_name = "DEVICE")]
        command_port: Option<String>,

        /// Serial device for call audio (e.g., /dev/ttyUSB4)
        #[arg(long, value_name = "DEVICE")]
        audio_port: Option<String>,

        /// Delay before dialing or answering (e.g., 500ms, 1s)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        settle: Option<Duration>,
    },

    /// Place a voice call
    Dial {
        /// Number to call
        number: String,
    },

    /// Answer the ringing call
    Answer,

    /// End the active call
    Hangup,

    /// Show the call state
    Status,

    /// Print modem events as they happen
    Follow,

    /// Send, read and delete text messages
    Sms {
        #[command(subcommand)]
        action: SmsAction,
    },

    /// Enable, disable or query call waiting
    Waiting {
        #[arg(value_enum)]
        mode: WaitingArg,
    },

    /// Register or erase call forwarding
    Forward {
        /// unconditional, busy, no-reply or not-reachable
        #[arg(value_parser = parse_reason)]
        reason: ForwardReason,

        #[arg(value_enum)]
        state: Switch,

        /// Forwarding target, required when switching on
        #[arg(long, value_name = "NUMBER", required_if_eq("state", "on"))]
        number: Option<String>,
    },

    /// Show the configured and detected serial ports
    Ports,

    /// List available audio devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Text message actions
#[derive(Subcommand, Debug)]
pub enum SmsAction {
    /// Send a message
    Send {
        /// Recipient number
        recipient: String,
        /// Message text
        body: String,
    },
    /// Read one stored message by index, or all of them
    Read {
        /// Storage index (default: all)
        index: Option<u32>,
    },
    /// List all stored messages
    List,
    /// Delete one stored message, or all of them with --all
    Delete {
        /// Storage index
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        index: Option<u32>,
        /// Delete every stored message
        #[arg(long)]
        all: bool,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitingArg {
    On,
    Off,
    Query,
}

impl From<WaitingArg> for CallWaitingMode {
    fn from(arg: WaitingArg) -> Self {
        match arg {
            WaitingArg::On => CallWaitingMode::On,
            WaitingArg::Off => CallWaitingMode::Off,
            WaitingArg::Query => CallWaitingMode::Query,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        self == Switch::On
    }
}

/// Parse a duration string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`300ms`, `1s`, `1s500ms`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_reason(s: &str) -> Result<ForwardReason, String> {
    s.parse::<ForwardReason>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_required() {
        let err = Cli::try_parse_from(["simvoice"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["simvoice", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from([
            "simvoice",
            "status",
            "--config",
            "/tmp/config.toml",
            "--socket",
            "/tmp/s.sock",
            "-q",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/s.sock")));
        assert!(cli.quiet);
    }

    #[test]
    fn test_parse_dial() {
        let cli = Cli::try_parse_from(["simvoice", "dial", "+15551234"]).unwrap();
        match cli.command {
            Commands::Dial { number } => assert_eq!(number, "+15551234"),
            other => panic!("Expected Dial command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_daemon_overrides() {
        let cli = Cli::try_parse_from([
            "simvoice",
            "daemon",
            "--command-port",
            "/dev/ttyUSB2",
            "--settle",
            "300ms",
        ])
        .unwrap();
        match cli.command {
            Commands::Daemon {
                command_port,
                audio_port,
                settle,
            } => {
                assert_eq!(command_port.as_deref(), Some("/dev/ttyUSB2"));
                assert!(audio_port.is_none());
                assert_eq!(settle, Some(Duration::from_millis(300)));
            }
            other => panic!("Expected Daemon command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(
            parse_duration("1s500ms").unwrap(),
            Duration::from_millis(1500)
        );
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_sms_send() {
        let cli = Cli::try_parse_from(["simvoice", "sms", "send", "+1", "Hello there"]).unwrap();
        match cli.command {
            Commands::Sms {
                action: SmsAction::Send { recipient, body },
            } => {
                assert_eq!(recipient, "+1");
                assert_eq!(body, "Hello there");
            }
            other => panic!("Expected Sms Send, got {:?}", other),
        }
    }

    #[test]
    fn test_sms_read_without_index_means_all() {
        let cli = Cli::try_parse_from(["simvoice", "sms", "read"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sms {
                action: SmsAction::Read { index: None }
            }
        ));
    }

    #[test]
    fn test_sms_delete_needs_index_or_all() {
        assert!(Cli::try_parse_from(["simvoice", "sms", "delete"]).is_err());
        assert!(Cli::try_parse_from(["simvoice", "sms", "delete", "3", "--all"]).is_err());

        let cli = Cli::try_parse_from(["simvoice", "sms", "delete", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sms {
                action: SmsAction::Delete {
                    index: None,
                    all: true
                }
            }
        ));
    }

    #[test]
    fn test_parse_waiting_modes() {
        let cli = Cli::try_parse_from(["simvoice", "waiting", "query"]).unwrap();
        match cli.command {
            Commands::Waiting { mode } => {
                assert_eq!(CallWaitingMode::from(mode), CallWaitingMode::Query)
            }
            other => panic!("Expected Waiting command, got {:?}", other),
        }
        assert!(Cli::try_parse_from(["simvoice", "waiting", "maybe"]).is_err());
    }

    #[test]
    fn test_parse_forward_on_requires_number() {
        assert!(Cli::try_parse_from(["simvoice", "forward", "busy", "on"]).is_err());

        let cli = Cli::try_parse_from([
            "simvoice",
            "forward",
            "no-reply",
            "on",
            "--number",
            "+4930123",
        ])
        .unwrap();
        match cli.command {
            Commands::Forward {
                reason,
                state,
                number,
            } => {
                assert_eq!(reason, ForwardReason::NoReply);
                assert!(state.enabled());
                assert_eq!(number.as_deref(), Some("+4930123"));
            }
            other => panic!("Expected Forward command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_forward_off_without_number() {
        let cli = Cli::try_parse_from(["simvoice", "forward", "unconditional", "off"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Forward {
                reason: ForwardReason::Unconditional,
                state: Switch::Off,
                number: None,
            }
        ));
    }

    #[test]
    fn test_forward_rejects_unknown_reason() {
        assert!(Cli::try_parse_from(["simvoice", "forward", "sometimes", "off"]).is_err());
    }

    #[test]
    fn test_parse_config_and_completions() {
        let cli = Cli::try_parse_from(["simvoice", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));

        let cli = Cli::try_parse_from(["simvoice", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["simvoice", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
