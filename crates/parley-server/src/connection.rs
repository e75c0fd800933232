//! Per-connection handler: register, then pump frames both ways until the
//! socket closes.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use parley_common::{ClientMessage, SignalError};
use tokio_tungstenite::tungstenite::Message;

use crate::presence::Coordinator;
use crate::session;

/// Handle a single WebSocket connection.
pub async fn handle_connection<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    addr: SocketAddr,
    coordinator: Coordinator,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // 1. Register. `your-id` is the first thing queued on our channel.
    let (tx, mut rx) = session::transport();
    let client = coordinator.connect(tx).await;
    tracing::info!(peer = %addr, client = %client, "Client connected");

    // 2. Forwarding loop.
    loop {
        tokio::select! {
            // Frames queued for this client → its WebSocket. The queue closes
            // when the coordinator drops an unresponsive session.
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    tracing::warn!(client = %client, "Session dropped by server");
                    break;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(client = %client, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // Frames from this client's WebSocket → coordinator
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => coordinator.handle(&client, message).await,
                            Err(e) => {
                                tracing::warn!(client = %client, error = %e, "Malformed frame");
                                coordinator
                                    .reject(&client, SignalError::Transport(e.to_string()))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(client = %client, "Binary frame rejected");
                        coordinator
                            .reject(&client, SignalError::Transport("expected a JSON text frame".into()))
                            .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 3. Cleanup. Runs once per connection whatever ended the loop.
    coordinator.disconnect(&client).await;
    tracing::info!(peer = %addr, client = %client, "Client disconnected");
}
