//! Backend seam for the actual peer connection (the WebRTC stack).
//!
//! The connection manager only negotiates: it hands session descriptions and
//! ICE candidates to a [`PeerConnection`] and forwards whatever the backend
//! produces. Any ICE/STUN/TURN-capable stack can sit behind these traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parley_common::{ClientId, PeerError};
use parley_config::IceServerConfig;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Events a backend reports for one peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local ICE candidate to trickle to the remote side.
    LocalCandidate(Value),
    /// Media path established.
    Connected,
    /// ICE or DTLS failure. The link is torn down.
    Failed(String),
}

/// Opens peer connections. One per client, shared by every link.
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    async fn open(
        &self,
        remote: &ClientId,
        media: &LocalMedia,
        ice_servers: &[IceServerConfig],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

/// One peer connection, driven by exactly one link task.
#[async_trait]
pub trait PeerConnection: Send {
    /// Create an offer and apply it as the local description.
    async fn create_offer(&mut self) -> Result<Value, PeerError>;

    /// Apply a remote offer and return the local answer.
    async fn accept_offer(&mut self, offer: Value) -> Result<Value, PeerError>;

    /// Apply the remote answer to a previously created offer.
    async fn accept_answer(&mut self, answer: Value) -> Result<(), PeerError>;

    /// Only called once the remote description is in place.
    async fn add_ice_candidate(&mut self, candidate: Value) -> Result<(), PeerError>;

    async fn close(&mut self);
}

/// The local outgoing audio track, shared read-only by every link.
///
/// Muting flips the track's enabled flag in place; links are never
/// rebuilt for it.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    audio_enabled: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new() -> Self {
        Self {
            audio_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend that completes negotiation without carrying media. Reports
/// `Connected` as soon as both descriptions are applied; useful for
/// exercising signaling end to end.
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector;

pub struct LoopbackConnection {
    remote: ClientId,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: bool,
}

impl LoopbackConnection {
    fn connected(&self) -> Result<(), PeerError> {
        self.events
            .send(PeerEvent::Connected)
            .map_err(|_| PeerError::Closed)
    }

    fn check_open(&self) -> Result<(), PeerError> {
        if self.closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn open(
        &self,
        remote: &ClientId,
        _media: &LocalMedia,
        _ice_servers: &[IceServerConfig],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        Ok(Box::new(LoopbackConnection {
            remote: remote.clone(),
            events,
            closed: false,
        }))
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&mut self) -> Result<Value, PeerError> {
        self.check_open()?;
        Ok(json!({"type": "offer", "sdp": format!("loopback offer to {}", self.remote)}))
    }

    async fn accept_offer(&mut self, _offer: Value) -> Result<Value, PeerError> {
        self.check_open()?;
        self.connected()?;
        Ok(json!({"type": "answer", "sdp": format!("loopback answer to {}", self.remote)}))
    }

    async fn accept_answer(&mut self, _answer: Value) -> Result<(), PeerError> {
        self.check_open()?;
        self.connected()
    }

    async fn add_ice_candidate(&mut self, _candidate: Value) -> Result<(), PeerError> {
        self.check_open()
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
