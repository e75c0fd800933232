//! parley-server: WebSocket signaling and room-presence server.
//!
//! Assigns every connection an id, tracks room membership and mic slots,
//! and relays WebRTC offers, answers and ICE candidates between peers. The
//! server never inspects signaling payloads.

pub mod connection;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod server;
pub mod session;

pub use presence::{Coordinator, PresenceState, ServerState};
pub use rooms::{Room, RoomRegistry, SlotGrant};
pub use server::{bind, serve, spawn};
pub use session::{scripted_ids, sequential_ids, SessionRegistry};
