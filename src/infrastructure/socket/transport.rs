//! Transport Socket Client
//!
//! Owns one physical WebSocket connection: frames outbound messages as
//! JSON text, demultiplexes inbound frames into [`SocketEvent`]s, and
//! answers protocol pings. Decode failures are expected wire noise and are
//! dropped with a debug log; they never terminate the connection.
//!
//! Delivery order within one physical connection is preserved: inbound
//! frames are decoded and forwarded on a single task in arrival order.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::messages::{ClientMessage, ServerMessage};

/// Errors raised at the transport level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket task has ended; the handle is no longer usable.
    #[error("socket closed")]
    Closed,
}

/// Events emitted by the socket task.
#[derive(Debug)]
pub enum SocketEvent {
    /// A decoded inbound message.
    Message(ServerMessage),
    /// The physical connection ended, normally or abnormally.
    Closed {
        /// Close reason, when one is known.
        reason: Option<String>,
    },
}

/// Handle to a live socket; cheap to clone.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outbound: mpsc::Sender<ClientMessage>,
    cancel: CancellationToken,
}

impl SocketHandle {
    /// Queue an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the socket task has ended.
    pub async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the socket has been closed or has failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Transport socket client.
pub struct SocketClient;

impl SocketClient {
    /// Connect to the session server.
    ///
    /// Returns a handle for sending/closing and the inbound event stream.
    /// The connection is serviced by a spawned task that ends when the
    /// handle is closed, the server closes, or the socket fails.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the WebSocket handshake fails.
    pub async fn connect(
        url: &str,
    ) -> Result<(SocketHandle, mpsc::Receiver<SocketEvent>), TransportError> {
        tracing::debug!(url = %url, "Connecting to session stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(256);
        let cancel = CancellationToken::new();

        tokio::spawn(run_socket(
            ws_stream,
            outbound_rx,
            event_tx,
            cancel.clone(),
        ));

        Ok((
            SocketHandle {
                outbound: outbound_tx,
                cancel,
            },
            event_rx,
        ))
    }
}

/// Service one physical connection until close, failure, or cancellation.
async fn run_socket(
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
    event_tx: mpsc::Sender<SocketEvent>,
    cancel: CancellationToken,
) {
    let codec = JsonCodec::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Socket cancelled, sending close frame");
                let _ = ws.close(None).await;
                break;
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Err(e) = send_frame(&mut ws, &codec, &message).await {
                            tracing::warn!(error = %e, "Outbound send failed");
                            let _ = event_tx
                                .send(SocketEvent::Closed { reason: Some(e.to_string()) })
                                .await;
                            break;
                        }
                    }
                    None => {
                        // All handles dropped.
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            inbound = ws.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match codec.decode(&text) {
                            Ok(message) => {
                                if event_tx.send(SocketEvent::Message(message)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Dropping undecodable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws.send(Message::Pong(data)).await {
                            tracing::warn!(error = %e, "Pong send failed");
                            let _ = event_tx
                                .send(SocketEvent::Closed { reason: Some(e.to_string()) })
                                .await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        tracing::info!(reason = ?reason, "Server sent close frame");
                        let _ = event_tx.send(SocketEvent::Closed { reason }).await;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary/pong frames are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Socket read failed");
                        let _ = event_tx
                            .send(SocketEvent::Closed { reason: Some(e.to_string()) })
                            .await;
                        break;
                    }
                    None => {
                        tracing::info!("Socket stream ended");
                        let _ = event_tx.send(SocketEvent::Closed { reason: None }).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    codec: &JsonCodec,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    let json = codec
        .encode(message)
        .map_err(|e| TransportError::ConnectionFailed(format!("encode failed: {e}")))?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
