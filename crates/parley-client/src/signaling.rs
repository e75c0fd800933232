//! WebSocket connection to the signaling server.
//!
//! `connect` resolves only once the server has assigned our id, so nothing
//! is ever sent before `your-id` arrives. After that a background task pumps
//! frames both ways until either side closes.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::{ClientId, ClientMessage, ParleyError, ServerMessage, SignalingMessage};
use parley_config::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live signaling session.
pub struct SignalingClient {
    id: ClientId,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `url` and wait for `your-id`, all within `timeout`.
    /// Returns the client and the stream of every later server frame.
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ParleyError> {
        info!(url, "Connecting to signaling server");
        let (ws, id) = tokio::time::timeout(timeout, handshake(url))
            .await
            .map_err(|_| {
                ParleyError::Network(format!("no your-id from {url} within {timeout:?}"))
            })??;
        info!(client = %id, "Signaling connected");

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(connection_loop(
            sink,
            stream,
            outbound_rx,
            inbound_tx,
            shutdown.clone(),
        ));

        Ok((
            Self {
                id,
                outbound,
                shutdown,
                task,
            },
            inbound,
        ))
    }

    /// Connect using `[client] server_url` and `connect_timeout_secs`.
    pub async fn connect_with(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ParleyError> {
        Self::connect(
            &config.server_url,
            Duration::from_secs(u64::from(config.connect_timeout_secs)),
        )
        .await
    }

    /// The id the server assigned to this connection.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// A sender for outgoing frames, e.g. for a
    /// [`ConnectionManager`](crate::ConnectionManager).
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound.clone()
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), ParleyError> {
        self.outbound
            .send(message)
            .map_err(|_| ParleyError::Network("signaling connection closed".into()))
    }

    pub fn join_room(&self, room_id: &str, username: Option<String>) -> Result<(), ParleyError> {
        self.send(ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            username,
        })
    }

    pub fn leave_room(&self) -> Result<(), ParleyError> {
        self.send(ClientMessage::LeaveRoom)
    }

    pub fn request_mic(&self) -> Result<(), ParleyError> {
        self.send(ClientMessage::RequestMic)
    }

    pub fn leave_mic(&self) -> Result<(), ParleyError> {
        self.send(ClientMessage::LeaveMic)
    }

    pub fn chat(&self, message: &str) -> Result<(), ParleyError> {
        self.send(ClientMessage::ChatMessage {
            message: message.to_string(),
        })
    }

    /// Relay a signaling message. Any `from` on it is dropped; the server
    /// stamps the real sender.
    pub fn signal(&self, message: SignalingMessage) -> Result<(), ParleyError> {
        self.send(ClientMessage::signal(message))
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a close frame and stop the background task.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Signaling task ended abnormally");
        }
    }
}

/// Open the socket and read frames until `your-id`.
async fn handshake(url: &str) -> Result<(WsStream, ClientId), ParleyError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ParleyError::Network(format!("failed to connect to {url}: {e}")))?;

    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::YourId { id }) => return Ok((ws, id)),
                Ok(other) => {
                    return Err(ParleyError::Protocol(format!(
                        "expected your-id first, got {}",
                        other.kind()
                    )))
                }
                Err(e) => return Err(ParleyError::Protocol(format!("invalid first frame: {e}"))),
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(ParleyError::Network(
                    "connection closed before your-id".into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ParleyError::Network(e.to_string())),
        }
    }
}

async fn connection_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut stream: SplitStream<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }

            // Our frames → server
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if sink.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode frame"),
                }
            }

            // Server frames → caller
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                if inbound.send(message).is_err() {
                                    debug!("Inbound receiver dropped");
                                }
                            }
                            Err(e) => warn!(error = %e, "Malformed server frame dropped"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sink.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Signaling server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
