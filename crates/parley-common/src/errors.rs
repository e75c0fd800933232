use std::path::PathBuf;

use crate::id::ClientId;
use crate::protocol::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),

    #[error("no per-user config directory on this platform")]
    NoConfigDir,

    #[error("config io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures the signaling server reports back to the client that caused them.
///
/// None of these are fatal: the connection stays open and the server keeps
/// serving every other session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("Target Not Found: {0}")]
    TargetNotFound(ClientId),

    #[error("all mic slots in room {room_id} are taken")]
    RoomFull { room_id: String },

    #[error("not a member of any room")]
    NotInRoom,

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("malformed message: {0}")]
    Transport(String),
}

impl SignalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SignalError::TargetNotFound(_) => ErrorCode::TargetNotFound,
            SignalError::RoomFull { .. } => ErrorCode::RoomFull,
            SignalError::NotInRoom => ErrorCode::NotInRoom,
            SignalError::NotPermitted(_) => ErrorCode::NotPermitted,
            SignalError::Transport(_) => ErrorCode::MalformedMessage,
        }
    }

    /// The client the error is about, if any.
    pub fn target(&self) -> Option<&ClientId> {
        match self {
            SignalError::TargetNotFound(id) => Some(id),
            _ => None,
        }
    }
}

/// Local peer-connection failures. These never leave the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("peer did not connect within {0:?}")]
    Timeout(std::time::Duration),

    #[error("peer connection closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
