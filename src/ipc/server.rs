//! Async Unix socket IPC server for daemon control.

use crate::error::{Result, SimvoiceError};
use crate::ipc::protocol::{Command, DaemonEvent, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};

/// Handler trait for processing IPC commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a command and return a response.
    async fn handle(&self, command: Command) -> Response;

    /// Event stream for a `follow` client. `None` refuses the request.
    ///
    /// The stream ends when the sender side is dropped.
    fn follow(&self) -> Option<mpsc::UnboundedReceiver<DaemonEvent>> {
        None
    }
}

/// State for managing server shutdown.
#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<Mutex<bool>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    async fn is_shutdown(&self) -> bool {
        *self.shutdown.lock().await
    }

    async fn set_shutdown(&self) {
        *self.shutdown.lock().await = true;
    }
}

/// IPC server for handling daemon control commands via Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    state: ServerState,
}

impl IpcServer {
    /// Create a new IPC server bound to the specified socket path.
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        Ok(Self {
            socket_path,
            state: ServerState::new(),
        })
    }

    /// Get the socket path this server is using.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get the default socket path based on XDG_RUNTIME_DIR or fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("simvoice.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/simvoice-{}.sock", uid))
        }
    }

    /// Start the IPC server and handle incoming connections.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| SimvoiceError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| SimvoiceError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        tracing::debug!("IPC listening on {}", self.socket_path.display());

        let handler = Arc::new(handler);

        loop {
            if self.state.is_shutdown().await {
                break;
            }

            // Accept connection with timeout to check for shutdown
            let accept_result =
                tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accept_result {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::warn!("Error handling client: {}", e);
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(SimvoiceError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stop the IPC server and clean up the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.state.set_shutdown().await;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| SimvoiceError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Read command (one line JSON)
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    let command = match Command::from_json(line.trim()) {
        Ok(command) => command,
        Err(e) => {
            let response = Response::error(format!("Failed to parse command: {}", e));
            write_line(&mut writer, &serialize(&response)?).await?;
            return Err(SimvoiceError::IpcProtocol {
                message: format!("Failed to parse command: {}", e),
            });
        }
    };
    tracing::debug!("IPC command: {:?}", command);

    if command == Command::Follow {
        let Some(mut events) = handler.follow() else {
            let response = Response::error("follow is not supported");
            return write_line(&mut writer, &serialize(&response)?).await;
        };
        write_line(&mut writer, &serialize(&Response::Ok)?).await?;

        // Stream until the handler closes the stream or the client hangs up.
        let mut discard = String::new();
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let json = event.to_json().map_err(|e| SimvoiceError::IpcProtocol {
                        message: format!("Failed to serialize event: {}", e),
                    })?;
                    write_line(&mut writer, &json).await?;
                }
                read = reader.read_line(&mut discard) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(_) => discard.clear(),
                    }
                }
            }
        }
        return Ok(());
    }

    let response = handler.handle(command).await;
    write_line(&mut writer, &serialize(&response)?).await
}

fn serialize(response: &Response) -> Result<String> {
    response.to_json().map_err(|e| SimvoiceError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })
}

async fn write_line<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to write to client: {}", e),
        })?;

    writer
        .write_all(b"\n")
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to write newline to client: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| SimvoiceError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::modem::ModemEvent;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    // Mock handler for testing
    struct MockCommandHandler {
        events: Vec<DaemonEvent>,
        follow_enabled: bool,
    }

    impl MockCommandHandler {
        fn new() -> Self {
            Self {
                events: Vec::new(),
                follow_enabled: false,
            }
        }

        fn with_events(mut self, events: Vec<DaemonEvent>) -> Self {
            self.events = events;
            self.follow_enabled = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl CommandHandler for MockCommandHandler {
        async fn handle(&self, command: Command) -> Response {
            match command {
                Command::Status => Response::Status {
                    call_state: CallState::Active,
                    relay_active: true,
                },
                Command::Answer => Response::error("Cannot answer while idle"),
                _ => Response::Ok,
            }
        }

        fn follow(&self) -> Option<mpsc::UnboundedReceiver<DaemonEvent>> {
            if !self.follow_enabled {
                return None;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for event in &self.events {
                let _ = tx.send(event.clone());
            }
            Some(rx)
        }
    }

    async fn spawn_server(socket_path: PathBuf, handler: MockCommandHandler) {
        tokio::spawn(async move {
            let server = IpcServer::new(socket_path).unwrap();
            server.start(handler).await
        });
        // Give server time to start
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    async fn exchange(socket_path: &Path, request: &str) -> String {
        let mut stream = UnixStream::connect(socket_path).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response_data = Vec::new();
        stream.read_to_end(&mut response_data).await.unwrap();
        String::from_utf8(response_data).unwrap()
    }

    #[test]
    fn test_default_socket_path_returns_valid_path() {
        let path = IpcServer::default_socket_path();
        let path_str = path.to_string_lossy();
        if std::env::var("XDG_RUNTIME_DIR").is_ok() {
            assert!(
                path_str.ends_with("simvoice.sock"),
                "With XDG_RUNTIME_DIR, expected path ending with simvoice.sock, got: {:?}",
                path
            );
        } else {
            let uid = unsafe { libc::getuid() };
            let expected = format!("/tmp/simvoice-{}.sock", uid);
            assert_eq!(path_str, expected, "Without XDG_RUNTIME_DIR, expected fallback path");
        }
    }

    #[tokio::test]
    async fn test_server_binds_to_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        spawn_server(socket_path.clone(), MockCommandHandler::new()).await;

        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_client_can_send_command_and_receive_response() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        spawn_server(socket_path.clone(), MockCommandHandler::new()).await;

        let request = format!("{}\n", Command::Status.to_json().unwrap());
        let response = Response::from_json(exchange(&socket_path, &request).await.trim()).unwrap();

        assert_eq!(
            response,
            Response::Status {
                call_state: CallState::Active,
                relay_active: true,
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_concurrent_clients() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        spawn_server(socket_path.clone(), MockCommandHandler::new()).await;

        let mut client_handles = vec![];
        for i in 0..5 {
            let socket_path = socket_path.clone();
            client_handles.push(tokio::spawn(async move {
                let command = if i % 2 == 0 {
                    Command::Status
                } else {
                    Command::Hangup
                };
                let request = format!("{}\n", command.to_json().unwrap());
                Response::from_json(exchange(&socket_path, &request).await.trim()).unwrap()
            }));
        }

        for handle in client_handles {
            let response = handle.await.unwrap();
            assert!(matches!(response, Response::Status { .. } | Response::Ok));
        }
    }

    #[tokio::test]
    async fn test_server_answers_invalid_json_with_error() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        spawn_server(socket_path.clone(), MockCommandHandler::new()).await;

        let raw = exchange(&socket_path, "not valid json\n").await;
        match Response::from_json(raw.trim()).unwrap() {
            Response::Error { message } => assert!(message.contains("Failed to parse command")),
            other => panic!("Expected Error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_follow_streams_events_after_ok() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let handler = MockCommandHandler::new().with_events(vec![
            DaemonEvent::Modem {
                event: ModemEvent::CallerId {
                    number: "+15551234".to_string(),
                },
            },
            DaemonEvent::Closed,
        ]);
        spawn_server(socket_path.clone(), handler).await;

        let request = format!("{}\n", Command::Follow.to_json().unwrap());
        let raw = exchange(&socket_path, &request).await;
        let lines: Vec<&str> = raw.lines().collect();

        assert_eq!(lines.len(), 3, "ok plus two events, got {:?}", lines);
        assert_eq!(Response::from_json(lines[0]).unwrap(), Response::Ok);
        assert_eq!(
            DaemonEvent::from_json(lines[1]).unwrap(),
            DaemonEvent::Modem {
                event: ModemEvent::CallerId {
                    number: "+15551234".to_string()
                }
            }
        );
        assert_eq!(DaemonEvent::from_json(lines[2]).unwrap(), DaemonEvent::Closed);
    }

    #[tokio::test]
    async fn test_follow_refused_without_stream() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        spawn_server(socket_path.clone(), MockCommandHandler::new()).await;

        let request = format!("{}\n", Command::Follow.to_json().unwrap());
        let response = Response::from_json(exchange(&socket_path, &request).await.trim()).unwrap();
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_stop_removes_socket_file() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = Arc::new(IpcServer::new(socket_path.clone()).unwrap());

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.start(MockCommandHandler::new()).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(socket_path.exists());

        server.stop().await.unwrap();
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), task)
            .await
            .expect("server loop should notice shutdown");
        assert!(result.unwrap().is_ok());
        assert!(!socket_path.exists());
    }
}
