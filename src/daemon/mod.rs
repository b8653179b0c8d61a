//! Daemon mode for simvoice - owns the modem session and the IPC server.

pub mod handler;

use crate::error::{Result, SimvoiceError};
use crate::ipc::server::IpcServer;
use crate::modem::Modem;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Open the configured ports and audio devices, then serve until told to stop.
///
/// # Returns
/// Ok(()) on graceful shutdown, error otherwise
#[cfg(all(feature = "serial", feature = "cpal-audio"))]
pub async fn run_daemon(config: crate::config::Config, socket_path: Option<PathBuf>) -> Result<()> {
    use crate::audio::capture::{CpalDevices, suppress_audio_warnings};
    use crate::modem::ModemParts;
    use crate::transport::{ConfiguredPorts, PortResolver};

    // Suppress noisy JACK/ALSA warnings
    suppress_audio_warnings();

    let ports = ConfiguredPorts::from_config(&config.modem).resolve()?;
    let devices = Arc::new(CpalDevices::from_config(&config.audio));
    let parts = ModemParts::open_serial(&config.modem, &ports, devices)?;

    let socket_path = socket_path
        .or_else(|| config.daemon.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path);

    let modem = tokio::task::spawn_blocking(move || -> Result<Modem> {
        let modem = Modem::start(config, parts)?;
        modem.initialize()?;
        Ok(modem)
    })
    .await
    .map_err(|e| SimvoiceError::Other(format!("Modem setup task failed: {}", e)))??;
    tracing::info!("Modem initialized");

    serve(Arc::new(modem), socket_path).await
}

/// Serve IPC for `modem` until SIGINT, SIGTERM or a `shutdown` command.
///
/// Teardown order: IPC server, then the modem session.
pub async fn serve(modem: Arc<Modem>, socket_path: PathBuf) -> Result<()> {
    let server = Arc::new(IpcServer::new(socket_path)?);
    tracing::info!("IPC server listening at: {}", server.socket_path().display());

    let shutdown = Arc::new(Notify::new());
    let handler = handler::DaemonCommandHandler::new(Arc::clone(&modem), Arc::clone(&shutdown));

    let server_clone = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_clone.start(handler).await });

    tracing::info!("Daemon ready.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("Error setting up signal handler: {}", e);
            }
            tracing::info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.notified() => {
            tracing::info!("Shutting down on request...");
        }
    }

    server.stop().await?;
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("IPC server failed: {}", e),
        Err(e) => tracing::error!("Daemon server task failed: {}", e),
    }

    // Joins the controller and dispatcher threads.
    tokio::task::spawn_blocking(move || modem.shutdown())
        .await
        .map_err(|e| SimvoiceError::Other(format!("Modem shutdown task failed: {}", e)))?;

    tracing::info!("Daemon stopped.");
    Ok(())
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| SimvoiceError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
