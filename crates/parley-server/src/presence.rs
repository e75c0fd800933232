//! Presence coordinator: owns the session and room registries and turns
//! client frames into registry updates plus the broadcasts that follow them.
//!
//! All state lives behind one lock. Every frame is handled to completion
//! (including queueing its broadcasts) before the next one is looked at,
//! so membership snapshots, mic-slot arrays and relayed signals are always
//! observed in a single consistent order.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parley_common::{ClientId, ClientMessage, ServerMessage, SignalError};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::relay::relay;
use crate::rooms::{LeaveOutcome, RoomRegistry, SlotGrant};
use crate::session::{self, IdSource, SessionRegistry, Transport};


/// Where a client currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    /// Has a session, not in a room.
    Connected,
    Joined { room_id: String },
    OnMic { room_id: String, slot: usize },
}

/// Both registries. Only ever touched while holding the coordinator lock.
pub struct ServerState {
    pub sessions: SessionRegistry,
    pub rooms: RoomRegistry,
}

impl ServerState {
    pub fn new(sessions: SessionRegistry, rooms: RoomRegistry) -> Self {
        Self { sessions, rooms }
    }

    /// Register a connection and queue its `your-id` frame, which is
    /// therefore always the first frame it receives.
    pub fn connect(&mut self, transport: Transport) -> ClientId {
        let id = self.sessions.register(transport);
        self.sessions
            .send(&id, ServerMessage::YourId { id: id.clone() });
        id
    }

    /// Apply one client frame. Errors are meant for the sender only.
    pub fn dispatch(&mut self, client: &ClientId, message: ClientMessage) -> Result<(), SignalError> {
        let message = match message.into_signal() {
            Ok(signal) => return relay(&self.sessions, client, signal),
            Err(message) => message,
        };

        match message {
            ClientMessage::JoinRoom { room_id, username } => self.join(client, &room_id, username),
            ClientMessage::LeaveRoom => {
                self.leave_room(client);
                Ok(())
            }
            ClientMessage::RequestMic => self.request_mic(client),
            ClientMessage::LeaveMic => {
                self.leave_mic(client);
                Ok(())
            }
            ClientMessage::ChatMessage { message } => self.chat(client, message),
            ClientMessage::MuteAll => self.mute_all(client),
            ClientMessage::Kick { target } => self.kick(client, &target),
            // Relay frames were split off above.
            ClientMessage::Offer { .. }
            | ClientMessage::Answer { .. }
            | ClientMessage::IceCandidate { .. }
            | ClientMessage::Signal { .. } => Ok(()),
        }
    }

    /// Tear down a session. Returns `false` if it was already gone, so the
    /// departure broadcast happens exactly once.
    pub fn disconnect(&mut self, client: &ClientId) -> bool {
        if self.sessions.unregister(client).is_none() {
            return false;
        }
        if let Some(left) = self.rooms.leave_current(client) {
            self.announce_departure(client, &left);
        }
        true
    }

    /// Disconnect every session whose outbound queue overflowed. Their
    /// departure broadcasts may overflow other queues, so this repeats until
    /// no lagging session is left. Returns how many were dropped.
    pub fn evict_lagging(&mut self) -> usize {
        let mut evicted = 0;
        loop {
            let lagging = self.sessions.lagging();
            if lagging.is_empty() {
                return evicted;
            }
            for client in lagging {
                warn!(client = %client, "Dropping unresponsive session");
                if self.disconnect(&client) {
                    evicted += 1;
                }
            }
        }
    }

    pub fn presence(&self, client: &ClientId) -> Option<PresenceState> {
        if !self.sessions.contains(client) {
            return None;
        }
        Some(match self.rooms.room_of(client) {
            None => PresenceState::Connected,
            Some(room) => match room.slot_of(client) {
                Some(slot) => PresenceState::OnMic {
                    room_id: room.id().to_string(),
                    slot,
                },
                None => PresenceState::Joined {
                    room_id: room.id().to_string(),
                },
            },
        })
    }

    fn join(
        &mut self,
        client: &ClientId,
        room_id: &str,
        username: Option<String>,
    ) -> Result<(), SignalError> {
        if room_id.trim().is_empty() {
            return Err(SignalError::Transport("room id must not be empty".into()));
        }
        let username = username.filter(|name| !name.trim().is_empty());
        let outcome = self.rooms.join(room_id, client, username.clone());
        if let Some(left) = &outcome.left {
            self.announce_departure(client, left);
        }

        self.sessions.send(
            client,
            ServerMessage::ExistingUsers {
                users: outcome.existing.clone(),
            },
        );
        let Some(room) = self.rooms.room(room_id) else {
            return Ok(());
        };
        self.sessions.send(
            client,
            ServerMessage::MicStateUpdate {
                slots: room.slots().to_vec(),
            },
        );

        if outcome.newly_joined {
            let joined = ServerMessage::UserJoined {
                id: client.clone(),
                username,
            };
            self.broadcast(&outcome.existing, &joined);
            let user_list = ServerMessage::UpdateUserList {
                users: room.member_info(),
            };
            self.broadcast(&room.member_ids(), &user_list);
            info!(client = %client, room = room_id, members = outcome.existing.len() + 1, "User joined room");
        }
        Ok(())
    }

    fn leave_room(&mut self, client: &ClientId) {
        match self.rooms.leave_current(client) {
            Some(left) => {
                info!(client = %client, room = %left.room_id, "User left room");
                self.announce_departure(client, &left);
            }
            None => debug!(client = %client, "leave-room outside a room ignored"),
        }
    }

    fn request_mic(&mut self, client: &ClientId) -> Result<(), SignalError> {
        let room_id = self.current_room(client)?;
        match self.rooms.request_slot(&room_id, client)? {
            SlotGrant::Assigned(slot) => {
                info!(client = %client, room = %room_id, slot, "Mic slot taken");
                self.broadcast_slots(&room_id);
            }
            SlotGrant::AlreadySeated(slot) => {
                debug!(client = %client, room = %room_id, slot, "Already on mic");
            }
        }
        Ok(())
    }

    fn leave_mic(&mut self, client: &ClientId) {
        let Ok(room_id) = self.current_room(client) else {
            debug!(client = %client, "leave-mic outside a room ignored");
            return;
        };
        match self.rooms.release_slot(&room_id, client) {
            Some(slot) => {
                info!(client = %client, room = %room_id, slot, "Mic slot released");
                self.broadcast_slots(&room_id);
            }
            None => debug!(client = %client, room = %room_id, "leave-mic while off mic ignored"),
        }
    }

    fn chat(&mut self, client: &ClientId, message: String) -> Result<(), SignalError> {
        let room = self.rooms.room_of(client).ok_or(SignalError::NotInRoom)?;
        if message.trim().is_empty() {
            debug!(client = %client, "Blank chat message ignored");
            return Ok(());
        }
        let frame = ServerMessage::ChatMessage {
            from: client.clone(),
            username: room.member(client).and_then(|m| m.username.clone()),
            message,
            timestamp: now_millis(),
        };
        self.broadcast(&room.member_ids(), &frame);
        Ok(())
    }

    fn mute_all(&mut self, client: &ClientId) -> Result<(), SignalError> {
        let room = self.rooms.room_of(client).ok_or(SignalError::NotInRoom)?;
        if room.host() != Some(client) {
            return Err(SignalError::NotPermitted(
                "only the room host can mute everyone".into(),
            ));
        }
        let others: Vec<ClientId> = room
            .member_ids()
            .into_iter()
            .filter(|id| id != client)
            .collect();
        info!(client = %client, room = room.id(), muted = others.len(), "Host muted room");
        self.broadcast(&others, &ServerMessage::ForceMute { by: client.clone() });
        Ok(())
    }

    fn kick(&mut self, client: &ClientId, target: &ClientId) -> Result<(), SignalError> {
        let room = self.rooms.room_of(client).ok_or(SignalError::NotInRoom)?;
        if room.host() != Some(client) {
            return Err(SignalError::NotPermitted(
                "only the room host can kick".into(),
            ));
        }
        if target == client {
            return Err(SignalError::NotPermitted("the host cannot kick itself".into()));
        }
        if !room.contains(target) {
            return Err(SignalError::TargetNotFound(target.clone()));
        }
        let room_id = room.id().to_string();

        let Some(left) = self.rooms.leave(&room_id, target) else {
            return Err(SignalError::TargetNotFound(target.clone()));
        };
        info!(client = %client, target = %target, room = %room_id, "User kicked");
        self.sessions.send(
            target,
            ServerMessage::YouHaveBeenKicked {
                room_id: room_id.clone(),
            },
        );
        self.announce_departure(target, &left);
        Ok(())
    }

    /// Tell the members still in a room that `departed` is gone.
    fn announce_departure(&self, departed: &ClientId, left: &LeaveOutcome) {
        if left.room_closed {
            return;
        }
        self.broadcast(
            &left.remaining,
            &ServerMessage::UserDisconnected {
                id: departed.clone(),
            },
        );
        if left.released_slot.is_some() {
            self.broadcast_slots(&left.room_id);
        }
        if let Some(room) = self.rooms.room(&left.room_id) {
            self.broadcast(
                &left.remaining,
                &ServerMessage::UpdateUserList {
                    users: room.member_info(),
                },
            );
        }
    }

    fn broadcast_slots(&self, room_id: &str) {
        if let Some(room) = self.rooms.room(room_id) {
            let frame = ServerMessage::MicStateUpdate {
                slots: room.slots().to_vec(),
            };
            self.broadcast(&room.member_ids(), &frame);
        }
    }

    fn broadcast(&self, recipients: &[ClientId], message: &ServerMessage) {
        for id in recipients {
            if !self.sessions.send(id, message.clone()) {
                debug!(client = %id, kind = message.kind(), "Dropped frame for closing session");
            }
        }
    }

    fn current_room(&self, client: &ClientId) -> Result<String, SignalError> {
        self.rooms
            .room_of(client)
            .map(|room| room.id().to_string())
            .ok_or(SignalError::NotInRoom)
    }
}

/// Shared handle to the server state, cloned into every connection task.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<ServerState>>,
}

impl Coordinator {
    pub fn new(slot_count: usize) -> Self {
        Self::from_state(ServerState::new(
            SessionRegistry::new(),
            RoomRegistry::new(slot_count),
        ))
    }

    /// Coordinator whose session ids come from `ids`.
    pub fn with_id_source(slot_count: usize, ids: IdSource) -> Self {
        Self::from_state(ServerState::new(
            SessionRegistry::with_id_source(ids),
            RoomRegistry::new(slot_count),
        ))
    }

    pub fn from_state(state: ServerState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register a new connection and return its id. The `your-id` frame is
    /// already queued on `transport` when this returns.
    pub async fn connect(&self, transport: Transport) -> ClientId {
        self.state.lock().await.connect(transport)
    }

    /// Open an in-process session: the returned receiver sees exactly what a
    /// WebSocket client would.
    pub async fn open_session(&self) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = session::transport();
        let id = self.connect(tx).await;
        (id, rx)
    }

    /// Handle one frame from `client`. Failures are reported to `client` as an
    /// `error` frame; they never affect other sessions.
    pub async fn handle(&self, client: &ClientId, message: ClientMessage) {
        let mut state = self.state.lock().await;
        if !state.sessions.contains(client) {
            warn!(client = %client, "Frame from unregistered session dropped");
            return;
        }
        if let Err(err) = state.dispatch(client, message) {
            debug!(client = %client, error = %err, "Rejected client frame");
            state.sessions.send(client, ServerMessage::error(&err));
        }
        state.evict_lagging();
    }

    /// Report a frame that could not be parsed.
    pub async fn reject(&self, client: &ClientId, err: SignalError) {
        let mut state = self.state.lock().await;
        state.sessions.send(client, ServerMessage::error(&err));
        state.evict_lagging();
    }

    /// Remove `client` from every registry and notify its room. Safe to call
    /// more than once.
    pub async fn disconnect(&self, client: &ClientId) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.disconnect(client);
        state.evict_lagging();
        removed
    }

    pub async fn presence(&self, client: &ClientId) -> Option<PresenceState> {
        self.state.lock().await.presence(client)
    }

    /// Member ids of `room_id` in join order.
    pub async fn members(&self, room_id: &str) -> Option<Vec<ClientId>> {
        self.state
            .lock()
            .await
            .rooms
            .room(room_id)
            .map(|room| room.member_ids())
    }

    pub async fn mic_slots(&self, room_id: &str) -> Option<Vec<Option<ClientId>>> {
        self.state
            .lock()
            .await
            .rooms
            .room(room_id)
            .map(|room| room.slots().to_vec())
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.room_count()
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
