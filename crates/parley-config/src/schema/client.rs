//! Client-side signaling and peer-connection settings.

use serde::{Deserialize, Serialize};

/// One STUN/TURN server entry, in the shape browsers accept for
/// `RTCPeerConnection({ iceServers })`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Client connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling server.
    pub server_url: String,
    /// ICE servers handed to every peer connection.
    pub ice_servers: Vec<IceServerConfig>,
    /// Seconds a peer link may take to reach the connected state before it
    /// is discarded.
    pub handshake_timeout_secs: u32,
    /// Seconds to wait for the server to assign an id after connecting.
    pub connect_timeout_secs: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".into(),
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            handshake_timeout_secs: 15,
            connect_timeout_secs: 10,
        }
    }
}
