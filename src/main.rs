use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use simvoice::audio::capture::{Direction, list_devices};
use simvoice::cli::{Cli, Commands, ConfigAction, SmsAction};
use simvoice::config::Config;
use simvoice::daemon::run_daemon;
use simvoice::ipc::client::{follow, send_command};
use simvoice::ipc::protocol::{CallWaitingMode, Command, DaemonEvent, Response};
use simvoice::ipc::server::IpcServer;
use simvoice::modem::ModemEvent;
use simvoice::protocol::SmsProvenance;
use simvoice::transport::serial::available_ports;
use simvoice::transport::{ConfiguredPorts, PortResolver};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    simvoice::logging::init(cli.quiet, cli.verbose);

    let socket = cli.socket.clone();

    match cli.command {
        Commands::Daemon {
            command_port,
            audio_port,
            settle,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if command_port.is_some() {
                config.modem.command_port = command_port;
            }
            if audio_port.is_some() {
                config.modem.audio_port = audio_port;
            }
            if let Some(settle) = settle {
                config.modem.settle_ms = u64::try_from(settle.as_millis())
                    .context("settle delay is too long")?;
            }
            config.validate()?;
            run_daemon(config, socket).await?;
        }
        Commands::Dial { number } => {
            handle_ipc_command(socket, Command::Dial { number }).await?;
        }
        Commands::Answer => handle_ipc_command(socket, Command::Answer).await?,
        Commands::Hangup => handle_ipc_command(socket, Command::Hangup).await?,
        Commands::Status => handle_ipc_command(socket, Command::Status).await?,
        Commands::Follow => handle_follow(socket).await?,
        Commands::Sms { action } => {
            let command = match action {
                SmsAction::Send { recipient, body } => Command::SendSms { recipient, body },
                SmsAction::Read { index } => Command::ReadSms { index },
                SmsAction::List => Command::ListSms,
                SmsAction::Delete { index, all } => Command::DeleteSms {
                    index: if all { None } else { index },
                },
            };
            handle_ipc_command(socket, command).await?;
        }
        Commands::Waiting { mode } => {
            let mode = CallWaitingMode::from(mode);
            handle_ipc_command(socket, Command::CallWaiting { mode }).await?;
            if mode == CallWaitingMode::Query {
                println!(
                    "{}",
                    "The answer arrives as a call_waiting event (see: simvoice follow)".dimmed()
                );
            }
        }
        Commands::Forward {
            reason,
            state,
            number,
        } => {
            let command = Command::CallForwarding {
                reason,
                enabled: state.enabled(),
                number,
            };
            handle_ipc_command(socket, command).await?;
        }
        Commands::Ports => {
            let config = load_config(cli.config.as_deref())?;
            list_ports(&config)?;
        }
        Commands::Devices => list_audio_devices()?,
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "simvoice",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/simvoice/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn list_ports(config: &Config) -> Result<()> {
    match ConfiguredPorts::from_config(&config.modem).resolve() {
        Ok(pair) => {
            println!("Configured:");
            println!("  {}  {}", "command:".dimmed(), pair.command);
            println!("  {}    {}", "audio:".dimmed(), pair.audio);
        }
        Err(e) => println!("{}", format!("Not configured: {}", e).yellow()),
    }

    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports detected");
        return Ok(());
    }
    println!("Detected:");
    for port in ports {
        match port.description {
            Some(description) => println!("  {} ({})", port.path, description.dimmed()),
            None => println!("  {}", port.path),
        }
    }
    Ok(())
}

/// List available audio devices.
fn list_audio_devices() -> Result<()> {
    for (title, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = list_devices(direction)?;
        if devices.is_empty() {
            println!("No audio {} devices found", title);
            continue;
        }
        println!("Available audio {} devices:", title);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            let toml = toml::to_string_pretty(&config).context("Failed to render config")?;
            print!("{}", toml);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Send IPC command to daemon and handle response.
async fn handle_ipc_command(socket: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    match send_command(&socket_path, command).await {
        Ok(Response::Ok) => println!("{}", "OK".green()),
        Ok(Response::Status {
            call_state,
            relay_active,
        }) => {
            println!("Status:");
            println!("  {} {}", "Client:".dimmed(), simvoice::version_string());
            println!("  {}   {}", "Call:".dimmed(), call_state);
            println!(
                "  {}  {}",
                "Audio:".dimmed(),
                if relay_active { "relaying" } else { "off" }
            );
        }
        Ok(Response::Error { message }) => {
            eprintln!("{}", format!("Error: {}", message).red());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!(
                "{}",
                format!("Failed to communicate with daemon: {}", e).red()
            );
            eprintln!("Is the daemon running? Start it with: simvoice daemon");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Follow daemon events and print them as they arrive.
async fn handle_follow(socket: Option<PathBuf>) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    println!("Following modem events... (Ctrl+C to stop)");

    match follow(&socket_path, render_event).await {
        Ok(()) => println!("Daemon connection closed"),
        Err(e) => {
            eprintln!("Failed to follow daemon: {}", e);
            eprintln!("Is the daemon running? Start it with: simvoice daemon");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn render_event(event: &DaemonEvent) {
    let DaemonEvent::Modem { event } = event else {
        return;
    };
    match event {
        ModemEvent::CallStateChanged { state } => {
            println!("{} {}", "call".cyan(), state);
        }
        ModemEvent::CallerId { number } => {
            println!("{} {}", "caller".cyan(), number.bold());
        }
        ModemEvent::CallWaiting { enabled } => {
            println!(
                "{} {}",
                "waiting".cyan(),
                if *enabled { "enabled" } else { "disabled" }
            );
        }
        ModemEvent::SmsReceived { message } => {
            let origin = match message.provenance {
                SmsProvenance::Immediate => "direct".to_string(),
                SmsProvenance::Stored { index } => format!("#{}", index),
            };
            println!(
                "{} {} from {} at {}",
                "sms".magenta(),
                origin,
                message.sender.bold(),
                message.timestamp.dimmed()
            );
            println!("    {}", message.text);
        }
    }
}
