//! Wire protocol shared by the signaling server and its clients.
//!
//! Every frame is a JSON object carrying a kebab-case `type` field. Offer,
//! answer, ICE-candidate and generic signal payloads are opaque to the server:
//! it only reads `target` and overwrites `from` before forwarding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ClientId;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    LeaveRoom,
    RequestMic,
    LeaveMic,
    Offer {
        target: ClientId,
        /// Ignored by the server; present only so forged values still parse.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
        sdp: Value,
    },
    Answer {
        target: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
        sdp: Value,
    },
    IceCandidate {
        target: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
        candidate: Value,
    },
    Signal {
        target: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
        signal: Value,
    },
    ChatMessage {
        message: String,
    },
    MuteAll,
    Kick {
        target: ClientId,
    },
}

impl ClientMessage {
    /// Build the outgoing frame for a signaling message. Any `from` on the
    /// message is dropped: the server stamps it.
    pub fn signal(message: SignalingMessage) -> Self {
        let SignalingMessage {
            kind,
            target,
            payload,
            ..
        } = message;
        match kind {
            SignalKind::Offer => ClientMessage::Offer {
                target,
                from: None,
                sdp: payload,
            },
            SignalKind::Answer => ClientMessage::Answer {
                target,
                from: None,
                sdp: payload,
            },
            SignalKind::IceCandidate => ClientMessage::IceCandidate {
                target,
                from: None,
                candidate: payload,
            },
            SignalKind::Generic => ClientMessage::Signal {
                target,
                from: None,
                signal: payload,
            },
        }
    }

    /// Split off the relayable part of the frame, if this is a relay frame.
    /// The client-supplied `from` is carried along untouched; the relay
    /// replaces it.
    pub fn into_signal(self) -> Result<SignalingMessage, ClientMessage> {
        let (kind, target, from, payload) = match self {
            ClientMessage::Offer { target, from, sdp } => (SignalKind::Offer, target, from, sdp),
            ClientMessage::Answer { target, from, sdp } => (SignalKind::Answer, target, from, sdp),
            ClientMessage::IceCandidate {
                target,
                from,
                candidate,
            } => (SignalKind::IceCandidate, target, from, candidate),
            ClientMessage::Signal {
                target,
                from,
                signal,
            } => (SignalKind::Generic, target, from, signal),
            other => return Err(other),
        };
        Ok(SignalingMessage {
            kind,
            from,
            target,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Always the first frame on a connection.
    YourId { id: ClientId },
    /// Members present before the joiner, in join order.
    ExistingUsers { users: Vec<ClientId> },
    UserJoined {
        id: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    UserDisconnected { id: ClientId },
    UpdateUserList { users: Vec<MemberInfo> },
    MicStateUpdate { slots: Vec<Option<ClientId>> },
    Offer {
        from: ClientId,
        target: ClientId,
        sdp: Value,
    },
    Answer {
        from: ClientId,
        target: ClientId,
        sdp: Value,
    },
    IceCandidate {
        from: ClientId,
        target: ClientId,
        candidate: Value,
    },
    Signal {
        from: ClientId,
        target: ClientId,
        signal: Value,
    },
    ChatMessage {
        from: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        message: String,
        timestamp: u64,
    },
    ForceMute { by: ClientId },
    YouHaveBeenKicked {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
    },
}

impl ServerMessage {
    pub fn error(err: &crate::errors::SignalError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
            target: err.target().cloned(),
        }
    }

    /// The wire `type` of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::YourId { .. } => "your-id",
            ServerMessage::ExistingUsers { .. } => "existing-users",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::UserDisconnected { .. } => "user-disconnected",
            ServerMessage::UpdateUserList { .. } => "update-user-list",
            ServerMessage::MicStateUpdate { .. } => "mic-state-update",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice-candidate",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::ChatMessage { .. } => "chat-message",
            ServerMessage::ForceMute { .. } => "force-mute",
            ServerMessage::YouHaveBeenKicked { .. } => "you-have-been-kicked",
            ServerMessage::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    /// Catch-all `signal` frame for peers that negotiate through a single
    /// message type.
    #[serde(rename = "signal")]
    Generic,
}

/// A relayable message in transit. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    /// Server-stamped sender. `None` until the relay fills it in.
    pub from: Option<ClientId>,
    pub target: ClientId,
    pub payload: Value,
}

impl SignalingMessage {
    pub fn new(kind: SignalKind, target: ClientId, payload: Value) -> Self {
        Self {
            kind,
            from: None,
            target,
            payload,
        }
    }

    /// Build the server frame for this message with `from` set to the given
    /// sender, whatever the message carried before.
    pub fn into_frame(self, from: ClientId) -> ServerMessage {
        let SignalingMessage {
            kind,
            target,
            payload,
            ..
        } = self;
        match kind {
            SignalKind::Offer => ServerMessage::Offer {
                from,
                target,
                sdp: payload,
            },
            SignalKind::Answer => ServerMessage::Answer {
                from,
                target,
                sdp: payload,
            },
            SignalKind::IceCandidate => ServerMessage::IceCandidate {
                from,
                target,
                candidate: payload,
            },
            SignalKind::Generic => ServerMessage::Signal {
                from,
                target,
                signal: payload,
            },
        }
    }
}

/// One row of `update-user-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    TargetNotFound,
    RoomFull,
    NotInRoom,
    NotPermitted,
    MalformedMessage,
}
