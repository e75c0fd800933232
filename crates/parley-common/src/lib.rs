pub mod errors;
pub mod id;
pub mod protocol;

pub use errors::{ConfigError, ParleyError, PeerError, SignalError};
pub use id::{new_id, ClientId};
pub use protocol::{
    ClientMessage, ErrorCode, MemberInfo, ServerMessage, SignalKind, SignalingMessage,
};

pub type Result<T> = std::result::Result<T, ParleyError>;
