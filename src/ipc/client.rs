//! IPC client for sending commands to the daemon.

use crate::error::{Result, SimvoiceError};
use crate::ipc::protocol::{Command, DaemonEvent, Response};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Send a command to the daemon via Unix socket.
///
/// # Errors
/// Returns `SimvoiceError::IpcConnection` if connection fails
/// Returns `SimvoiceError::IpcProtocol` if serialization/deserialization fails
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let (mut reader, _writer) = request(socket_path, &command).await?;
    read_response(&mut reader).await
}

/// Subscribe to daemon events, calling `on_event` for each one.
///
/// Returns when the daemon closes the stream. A refused subscription comes
/// back as `SimvoiceError::Other` carrying the daemon's message.
pub async fn follow<F>(socket_path: &Path, mut on_event: F) -> Result<()>
where
    F: FnMut(&DaemonEvent),
{
    // Dropping the write half would half-close the socket, which the
    // server reads as the client hanging up.
    let (mut reader, _writer) = request(socket_path, &Command::Follow).await?;
    match read_response(&mut reader).await? {
        Response::Ok => {}
        Response::Error { message } => return Err(SimvoiceError::Other(message)),
        other => {
            return Err(SimvoiceError::IpcProtocol {
                message: format!("Unexpected response to follow: {:?}", other),
            });
        }
    }

    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| SimvoiceError::IpcConnection {
                message: format!("Failed to read event: {}", e),
            })?;
        if read == 0 {
            return Ok(());
        }

        let event = DaemonEvent::from_json(line.trim()).map_err(|e| SimvoiceError::IpcProtocol {
            message: format!("Failed to deserialize event: {}", e),
        })?;
        on_event(&event);
        if event == DaemonEvent::Closed {
            return Ok(());
        }
    }
}

async fn request(
    socket_path: &Path,
    command: &Command,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| SimvoiceError::IpcConnection {
                message: format!("Failed to connect to daemon: {}", e),
            })?;

    let (reader, mut writer) = stream.into_split();

    let command_json = command.to_json().map_err(|e| SimvoiceError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;

    writer
        .write_all(command_json.as_bytes())
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to write command: {}", e),
        })?;

    writer
        .write_all(b"\n")
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to write newline: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok((BufReader::new(reader), writer))
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<Response> {
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?;

    Response::from_json(response_line.trim()).map_err(|e| SimvoiceError::IpcProtocol {
        message: format!("Failed to deserialize response: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::ipc::server::{CommandHandler, IpcServer};
    use crate::modem::ModemEvent;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct MockHandler;

    #[async_trait::async_trait]
    impl CommandHandler for MockHandler {
        async fn handle(&self, command: Command) -> Response {
            match command {
                Command::Status => Response::Status {
                    call_state: CallState::Idle,
                    relay_active: false,
                },
                Command::Hangup => Response::error("Cannot end call while idle"),
                _ => Response::Ok,
            }
        }

        fn follow(&self) -> Option<mpsc::UnboundedReceiver<DaemonEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(DaemonEvent::Modem {
                event: ModemEvent::CallWaiting { enabled: true },
            });
            let _ = tx.send(DaemonEvent::Closed);
            Some(rx)
        }
    }

    async fn start_server(temp_dir: &TempDir) -> PathBuf {
        let socket_path = temp_dir.path().join("test.sock");
        let server_socket_path = socket_path.clone();
        tokio::spawn(async move {
            let server = IpcServer::new(server_socket_path).unwrap();
            server.start(MockHandler).await
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        socket_path
    }

    #[tokio::test]
    async fn test_send_command_status() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = start_server(&temp_dir).await;

        let response = send_command(&socket_path, Command::Status).await.unwrap();
        assert_eq!(
            response,
            Response::Status {
                call_state: CallState::Idle,
                relay_active: false,
            }
        );
    }

    #[tokio::test]
    async fn test_send_command_error_response() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = start_server(&temp_dir).await;

        let response = send_command(&socket_path, Command::Hangup).await.unwrap();
        assert_eq!(response, Response::error("Cannot end call while idle"));
    }

    #[tokio::test]
    async fn test_multiple_sequential_commands() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = start_server(&temp_dir).await;

        let commands = vec![
            Command::Dial {
                number: "+15551234".to_string(),
            },
            Command::Answer,
            Command::ListSms,
            Command::DeleteSms { index: Some(2) },
            Command::Shutdown,
        ];

        for cmd in commands {
            let response = send_command(&socket_path, cmd.clone()).await.unwrap();
            assert_eq!(response, Response::Ok, "Unexpected response for {:?}", cmd);
        }
    }

    #[tokio::test]
    async fn test_follow_collects_events_until_closed() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = start_server(&temp_dir).await;

        let mut seen = Vec::new();
        follow(&socket_path, |event| seen.push(event.clone()))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                DaemonEvent::Modem {
                    event: ModemEvent::CallWaiting { enabled: true }
                },
                DaemonEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_send_command_connection_failed() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        match send_command(&socket_path, Command::Status).await {
            Err(SimvoiceError::IpcConnection { message }) => {
                assert!(message.contains("Failed to connect to daemon"));
            }
            other => panic!("Expected IpcConnection error, got: {:?}", other),
        }
    }
}
