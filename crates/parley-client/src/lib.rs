//! parley-client: signaling client and peer connection manager.
//!
//! [`SignalingClient`] speaks the wire protocol to `parley-server`;
//! [`ConnectionManager`] turns the frames it receives into one negotiated
//! peer link per remote room member, using whatever [`PeerConnector`]
//! backend it is given.

mod link;
pub mod manager;
pub mod peer;
pub mod signaling;

pub use link::PeerLink;
pub use manager::{
    is_initiator, ConnectionEvent, ConnectionManager, ManagerCommand, ManagerConfig, ManagerHandle,
};
pub use peer::{LocalMedia, LoopbackConnector, PeerConnection, PeerConnector, PeerEvent};
pub use signaling::SignalingClient;
