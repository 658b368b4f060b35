//! Unix domain socket server for IPC
//!
//! Provides request-response commands for the tray/UI layer and pushes
//! status and listener events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::control::ListenerHandle;
use crate::events::ListenerEvent;
use crate::lifecycle::Autostart;

use super::protocol::{ListenerStatus, Notification, Request, Response};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared by all client handlers
struct ServerContext {
    handle: ListenerHandle,
    config_file: PathBuf,
    autostart: Autostart,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        handle: ListenerHandle,
        config_file: PathBuf,
        autostart: Autostart,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ServerContext {
                handle,
                config_file,
                autostart,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on a separate task so that pushing notifications
    /// never races a half-read frame.
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(8);

        let reader_task = tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut reader).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "failed to read request");
                        break;
                    }
                };

                let request = serde_json::from_slice::<Request>(&frame).map_err(|e| e.to_string());
                if request_tx.send(request).await.is_err() {
                    break;
                }
            }
        });

        let mut events: Option<broadcast::Receiver<ListenerEvent>> = None;

        let result: Result<()> = async {
            loop {
                tokio::select! {
                    request = request_rx.recv() => {
                        let Some(request) = request else {
                            return Ok(());
                        };

                        let response = match request {
                            Ok(request) => {
                                debug!(?request, "received request");
                                let (response, subscribe) = Self::process_request(request, &context);
                                if subscribe && events.is_none() {
                                    events = Some(context.handle.events().subscribe());
                                    debug!("client subscribed to notifications");
                                }
                                response
                            }
                            Err(message) => Response::Error {
                                code: "bad_request".to_string(),
                                message,
                            },
                        };

                        write_frame(&mut writer, &response).await?;
                    }

                    event = next_event(&mut events) => match event {
                        Ok(event) => {
                            write_frame(&mut writer, &Notification::from(event)).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged, notifications dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    },
                }
            }
        }
        .await;

        reader_task.abort();
        result
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    fn process_request(request: Request, context: &ServerContext) -> (Response, bool) {
        let handle = &context.handle;

        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => (Response::Status(Self::status(context)), false),

            Request::Pause => {
                let changed = handle.pause();
                info!(changed, "pause requested via IPC");
                (Response::PausedChanged { paused: true, changed }, false)
            }

            Request::Resume => {
                let changed = handle.resume();
                info!(changed, "resume requested via IPC");
                (Response::PausedChanged { paused: false, changed }, false)
            }

            Request::Stop => {
                info!("stop requested via IPC");
                handle.stop();
                (Response::Stopping, false)
            }

            Request::ReloadConfig { config } => {
                let config = match config {
                    Some(config) => config.normalized(),
                    None => ListenerConfig::load_or_default(&context.config_file),
                };
                let applied = handle.reload_config(config);
                (
                    Response::ConfigReloaded {
                        config: (*applied).clone(),
                    },
                    false,
                )
            }

            Request::AddToStartup => (Self::set_autostart(&context.autostart, true), false),

            Request::RemoveFromStartup => (Self::set_autostart(&context.autostart, false), false),

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    fn set_autostart(autostart: &Autostart, enabled: bool) -> Response {
        let result = if enabled {
            autostart.enable()
        } else {
            autostart.disable()
        };

        match result {
            Ok(()) => Response::StartupChanged {
                enabled: autostart.is_enabled(),
            },
            Err(e) => {
                warn!(error = %e, enabled, "failed to update startup entry");
                Response::Error {
                    code: "autostart_failed".to_string(),
                    message: format!("{:#}", e),
                }
            }
        }
    }

    fn status(context: &ServerContext) -> ListenerStatus {
        let handle = &context.handle;
        let stats = handle.stats();
        let config = handle.config().snapshot();

        ListenerStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            paused: handle.is_paused(),
            capturing: stats.is_capturing(),
            state: stats.state(),
            wake_phrase: config.wake_phrase.clone(),
            trigger_phrase: config.trigger_phrase.clone(),
            activations: stats.activations.load(Ordering::Relaxed),
            device_errors: stats.device_errors.load(Ordering::Relaxed),
            overruns: stats.overruns.load(Ordering::Relaxed),
            discarded: stats.discarded.load(Ordering::Relaxed),
            autostart: context.autostart.is_enabled(),
            uptime_secs: context.start_time.elapsed().as_secs(),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Wait for the next event, or forever when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<ListenerEvent>>,
) -> Result<ListenerEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read a length-prefixed frame; `None` on clean disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_MESSAGE_LEN, "message too large ({len} bytes)");

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
