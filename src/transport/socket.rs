//! Per-connection WebSocket event loop.
//!
//! Each open socket is driven by one tokio task that handles:
//!
//! - Incoming controller frames (keep-alive, rebroadcast)
//! - Outgoing frames queued by the manager
//! - The idle deadline, when one is configured
//!
//! When the loop exits for any reason it reports back to the
//! [`ConnectionManager`], which decides whether to reconnect.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Weak;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::frame;

use super::manager::ConnectionManager;

// ============================================================================
// Types
// ============================================================================

/// Client stream returned by `connect_async`.
pub(crate) type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ClientSink = SplitSink<ClientStream, Message>;

/// Internal commands for the event loop.
enum SocketCommand {
    /// Send a frame and report the write result.
    Send {
        frame: Value,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Close the socket without reporting back to the manager.
    Shutdown,
}

// ============================================================================
// Socket
// ============================================================================

/// Handle to a running socket event loop.
///
/// Cloning shares the same underlying socket.
#[derive(Debug, Clone)]
pub(crate) struct Socket {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
}

impl Socket {
    /// Spawns the event loop for an open stream.
    ///
    /// `generation` identifies this socket to the manager so that a close
    /// reported by a superseded socket is ignored.
    pub(crate) fn spawn(
        stream: ClientStream,
        connection_id: ConnectionId,
        generation: u64,
        manager: Weak<ConnectionManager>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(
            stream,
            command_rx,
            connection_id,
            generation,
            manager,
            idle_timeout,
        ));

        Self { command_tx }
    }

    /// Queues a frame and waits until it has been written.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the loop has exited
    /// - [`Error::Json`] if the frame cannot be encoded
    /// - [`Error::Connection`] if the write fails
    pub(crate) async fn send(&self, frame: Value) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(SocketCommand::Send { frame, result_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        result_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Asks the loop to close the socket.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(SocketCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Remote close, stream error or idle deadline.
    Closed,
    /// Local shutdown; the manager already knows.
    Shutdown,
}

async fn run_event_loop(
    stream: ClientStream,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    connection_id: ConnectionId,
    generation: u64,
    manager: Weak<ConnectionManager>,
    idle_timeout: Option<Duration>,
) {
    let (mut ws_write, mut ws_read) = stream.split();
    let mut idle_deadline = idle_timeout.map(|idle| Instant::now() + idle);

    let exit = loop {
        let deadline = idle_deadline;
        let idle = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            message = ws_read.next() => {
                // Any inbound frame, control frames included, proves the link is alive.
                if let (Some(Ok(_)), Some(idle)) = (&message, idle_timeout) {
                    idle_deadline = Some(Instant::now() + idle);
                }

                match message {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_incoming_frame(&text, &connection_id, &manager);

                        if let Some(reply) = reply
                            && let Err(e) = write_frame(&mut ws_write, &reply).await
                        {
                            warn!(connection_id = %connection_id, error = %e, "Failed to send keep-alive reply");
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(connection_id = %connection_id, "WebSocket closed by remote");
                        break Exit::Closed;
                    }

                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break Exit::Closed;
                    }

                    None => {
                        debug!(connection_id = %connection_id, "WebSocket stream ended");
                        break Exit::Closed;
                    }

                    // Binary, Ping, Pong
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Send { frame, result_tx }) => {
                        let result = write_frame(&mut ws_write, &frame).await;
                        let _ = result_tx.send(result);
                    }

                    Some(SocketCommand::Shutdown) | None => {
                        debug!(connection_id = %connection_id, "Socket shutdown requested");
                        let _ = ws_write.close().await;
                        break Exit::Shutdown;
                    }
                }
            }

            () = idle => {
                warn!(
                    connection_id = %connection_id,
                    idle_ms = idle_timeout.map_or(0, |d| d.as_millis() as u64),
                    "No frame within idle timeout, closing socket"
                );
                let _ = ws_write.close().await;
                break Exit::Closed;
            }
        }
    };

    debug!(connection_id = %connection_id, ?exit, "Event loop terminated");

    if exit == Exit::Closed
        && let Some(manager) = manager.upgrade()
    {
        manager.on_closed(&connection_id, generation).await;
    }
}

/// Parses one text frame and hands it to the manager.
///
/// Returns a frame to write back, if any.
fn handle_incoming_frame(
    text: &str,
    connection_id: &ConnectionId,
    manager: &Weak<ConnectionManager>,
) -> Option<Value> {
    let value = match frame::parse(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Dropping malformed frame");
            return None;
        }
    };

    trace!(connection_id = %connection_id, frame_type = ?frame::frame_type(&value), "Frame received");

    manager.upgrade()?.on_frame(connection_id, value)
}

async fn write_frame(ws_write: &mut ClientSink, frame: &Value) -> Result<()> {
    let json = to_string(frame)?;
    ws_write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| Error::connection(e.to_string()))
}
