//! Drives a real server over WebSocket connections on a loopback port.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_common::{ClientId, ClientMessage, ErrorCode, ServerMessage};
use parley_config::ServerConfig;
use parley_server::{scripted_ids, Coordinator};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        Self { ws }
    }

    async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Skip frames until one of `kind` arrives.
    async fn recv_kind(&mut self, kind: &str) -> ServerMessage {
        loop {
            let frame = self.recv().await;
            if frame.kind() == kind {
                return frame;
            }
        }
    }

    async fn join(&mut self, room: &str) {
        self.send(&ClientMessage::JoinRoom {
            room_id: room.into(),
            username: None,
        })
        .await;
    }
}

async fn start(ids: Vec<&'static str>, mic_slots: u32) -> SocketAddr {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        mic_slots,
    };
    let coordinator = Coordinator::with_id_source(mic_slots as usize, scripted_ids(ids));
    let (addr, _handle) = parley_server::spawn(&config, coordinator).await.unwrap();
    addr
}

fn id(s: &str) -> ClientId {
    ClientId::from(s)
}

#[tokio::test]
async fn two_peers_negotiate_through_server() {
    let addr = start(vec!["x1", "y1"], 4).await;

    let mut x = TestClient::connect(addr).await;
    assert_eq!(x.recv().await, ServerMessage::YourId { id: id("x1") });
    x.join("lobby").await;
    assert_eq!(
        x.recv().await,
        ServerMessage::ExistingUsers { users: vec![] }
    );

    let mut y = TestClient::connect(addr).await;
    assert_eq!(y.recv().await, ServerMessage::YourId { id: id("y1") });
    y.join("lobby").await;
    assert_eq!(
        y.recv().await,
        ServerMessage::ExistingUsers {
            users: vec![id("x1")]
        }
    );
    assert_eq!(
        x.recv_kind("user-joined").await,
        ServerMessage::UserJoined {
            id: id("y1"),
            username: None
        }
    );

    // x1 < y1, so x1 offers.
    x.send(&ClientMessage::Offer {
        target: id("y1"),
        from: None,
        sdp: json!({"type": "offer", "sdp": "v=0 x"}),
    })
    .await;
    match y.recv_kind("offer").await {
        ServerMessage::Offer { from, sdp, .. } => {
            assert_eq!(from, id("x1"));
            assert_eq!(sdp["sdp"], "v=0 x");
        }
        other => panic!("unexpected frame {other:?}"),
    }

    y.send(&ClientMessage::Answer {
        target: id("x1"),
        from: Some(id("mallory")),
        sdp: json!({"type": "answer", "sdp": "v=0 y"}),
    })
    .await;
    match x.recv_kind("answer").await {
        ServerMessage::Answer { from, .. } => assert_eq!(from, id("y1")),
        other => panic!("unexpected frame {other:?}"),
    }

    y.ws.close(None).await.unwrap();
    assert_eq!(
        x.recv_kind("user-disconnected").await,
        ServerMessage::UserDisconnected { id: id("y1") }
    );
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let addr = start(vec!["x1"], 4).await;
    let mut x = TestClient::connect(addr).await;
    x.recv().await;

    x.send_raw("{not json").await;
    match x.recv().await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::MalformedMessage),
        other => panic!("unexpected frame {other:?}"),
    }
    x.send_raw(r#"{"type":"teleport"}"#).await;
    assert!(matches!(x.recv().await, ServerMessage::Error { .. }));

    x.join("lobby").await;
    assert_eq!(
        x.recv().await,
        ServerMessage::ExistingUsers { users: vec![] }
    );
}

#[tokio::test]
async fn relay_to_unknown_target_reports_error() {
    let addr = start(vec!["x1"], 4).await;
    let mut x = TestClient::connect(addr).await;
    x.recv().await;

    x.send(&ClientMessage::IceCandidate {
        target: id("ghost"),
        from: None,
        candidate: json!({"candidate": "c"}),
    })
    .await;
    match x.recv().await {
        ServerMessage::Error {
            code,
            message,
            target,
        } => {
            assert_eq!(code, ErrorCode::TargetNotFound);
            assert!(message.contains("Target Not Found"));
            assert_eq!(target, Some(id("ghost")));
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn mic_slots_are_broadcast_over_the_wire() {
    let addr = start(vec!["x1", "y1"], 2).await;
    let mut x = TestClient::connect(addr).await;
    let mut y = TestClient::connect(addr).await;
    x.recv().await;
    y.recv().await;
    x.join("stage").await;
    x.recv_kind("mic-state-update").await;
    y.join("stage").await;
    y.recv_kind("mic-state-update").await;

    y.send(&ClientMessage::RequestMic).await;
    let expected = ServerMessage::MicStateUpdate {
        slots: vec![Some(id("y1")), None],
    };
    assert_eq!(x.recv_kind("mic-state-update").await, expected);
    assert_eq!(y.recv_kind("mic-state-update").await, expected);

    x.send(&ClientMessage::RequestMic).await;
    let expected = ServerMessage::MicStateUpdate {
        slots: vec![Some(id("y1")), Some(id("x1"))],
    };
    assert_eq!(x.recv_kind("mic-state-update").await, expected);
    assert_eq!(y.recv_kind("mic-state-update").await, expected);

    // Dropping the connection frees the slot.
    drop(y);
    assert_eq!(
        x.recv_kind("mic-state-update").await,
        ServerMessage::MicStateUpdate {
            slots: vec![None, Some(id("x1"))]
        }
    );
}
