//! Client connection manager: one peer link per remote room member.
//!
//! Consumes server frames, decides who offers, and keeps the set of links in
//! step with room membership. Link tasks report back through a channel that
//! the manager drains on the same control flow as server frames, so the link
//! map is only ever touched from one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parley_common::{ClientId, ClientMessage, ErrorCode, MemberInfo, PeerError, ServerMessage};
use parley_config::{ClientConfig, IceServerConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::{spawn_link, LinkCommand, LinkReport, LinkSpawn, LinkStatus, PeerLink};
use crate::peer::{LocalMedia, PeerConnector};

/// `true` if `local` creates the offer towards `remote`. Both sides compute
/// this independently and always disagree, so exactly one of them offers.
pub fn is_initiator(local: &ClientId, remote: &ClientId) -> bool {
    local < remote
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// A link that is not connected within this window is torn down.
    pub handshake_timeout: Duration,
    /// Handed to the backend for every new peer connection.
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ManagerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(u64::from(config.handshake_timeout_secs)),
            ice_servers: config.ice_servers.clone(),
        }
    }
}

/// What the manager surfaces to its owner (typically a UI).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Remote members of the current room, in join order.
    MembersChanged(Vec<ClientId>),
    UserList(Vec<MemberInfo>),
    PeerConnected(ClientId),
    /// Handshake failed or timed out. Local only; the server is not told.
    PeerUnreachable { remote: ClientId, reason: PeerError },
    PeerClosed(ClientId),
    MicSlotsChanged(Vec<Option<ClientId>>),
    Chat {
        from: ClientId,
        username: Option<String>,
        message: String,
        timestamp: u64,
    },
    /// Generic `signal` frame; not used for negotiation here.
    Signal { from: ClientId, signal: serde_json::Value },
    /// The room host muted us. The local track is already disabled.
    ForceMuted { by: ClientId },
    Kicked { room_id: String },
    ServerError {
        code: ErrorCode,
        message: String,
        target: Option<ClientId>,
    },
}

/// Commands accepted by a running manager.
#[derive(Debug, Clone)]
pub enum ManagerCommand {
    JoinRoom {
        room_id: String,
        username: Option<String>,
    },
    LeaveRoom,
    RequestMic,
    LeaveMic,
    Chat(String),
    SetMuted(bool),
    MuteAll,
    Kick(ClientId),
}

pub struct ConnectionManager {
    local_id: ClientId,
    config: ManagerConfig,
    connector: Arc<dyn PeerConnector>,
    media: LocalMedia,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    links: HashMap<ClientId, PeerLink>,
    /// Remote members of the current room, in join order.
    members: Vec<ClientId>,
    mic_slots: Vec<Option<ClientId>>,
    next_generation: u64,
    reports_tx: mpsc::UnboundedSender<LinkReport>,
    reports_rx: mpsc::UnboundedReceiver<LinkReport>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// `outbound` carries frames to the signaling server; see
    /// [`SignalingClient::sender`](crate::SignalingClient::sender).
    pub fn new(
        local_id: ClientId,
        config: ManagerConfig,
        connector: Arc<dyn PeerConnector>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let manager = Self {
            local_id,
            config,
            connector,
            media: LocalMedia::new(),
            outbound,
            links: HashMap::new(),
            members: Vec::new(),
            mic_slots: Vec::new(),
            next_generation: 0,
            reports_tx,
            reports_rx,
            events,
        };
        (manager, events_rx)
    }

    pub fn local_id(&self) -> &ClientId {
        &self.local_id
    }

    /// Handle to the outgoing track. Clones share the same enabled flag.
    pub fn media(&self) -> LocalMedia {
        self.media.clone()
    }

    pub fn members(&self) -> &[ClientId] {
        &self.members
    }

    pub fn mic_slots(&self) -> &[Option<ClientId>] {
        &self.mic_slots
    }

    pub fn link(&self, remote: &ClientId) -> Option<&PeerLink> {
        self.links.get(remote)
    }

    /// Remote ids with a live link, sorted.
    pub fn linked_peers(&self) -> Vec<ClientId> {
        let mut peers: Vec<ClientId> = self.links.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn is_muted(&self) -> bool {
        !self.media.audio_enabled()
    }

    /// Enable or disable the outgoing track. Links are left untouched.
    pub fn set_muted(&self, muted: bool) {
        self.media.set_audio_enabled(!muted);
        debug!(muted, peers = self.links.len(), "Local mute toggled");
    }

    pub fn join_room(&mut self, room_id: &str, username: Option<String>) {
        self.send(ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            username,
        });
    }

    /// Leave the current room and drop every link.
    pub fn leave_room(&mut self) {
        self.send(ClientMessage::LeaveRoom);
        self.reset_room();
    }

    pub fn apply_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::JoinRoom { room_id, username } => self.join_room(&room_id, username),
            ManagerCommand::LeaveRoom => self.leave_room(),
            ManagerCommand::RequestMic => self.send(ClientMessage::RequestMic),
            ManagerCommand::LeaveMic => self.send(ClientMessage::LeaveMic),
            ManagerCommand::Chat(message) => self.send(ClientMessage::ChatMessage { message }),
            ManagerCommand::SetMuted(muted) => self.set_muted(muted),
            ManagerCommand::MuteAll => self.send(ClientMessage::MuteAll),
            ManagerCommand::Kick(target) => self.send(ClientMessage::Kick { target }),
        }
    }

    /// Apply one frame from the signaling server.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::YourId { id } => {
                if id != self.local_id {
                    warn!(expected = %self.local_id, got = %id, "Unexpected your-id");
                }
            }
            ServerMessage::ExistingUsers { users } => {
                // Fresh snapshot after a join: anyone not in it is gone.
                self.members.clear();
                for user in users {
                    if user != self.local_id && !self.members.contains(&user) {
                        self.members.push(user);
                    }
                }
                self.drop_stale_links();
                for remote in self.members.clone() {
                    self.ensure_link_if_initiator(&remote);
                }
                self.emit(ConnectionEvent::MembersChanged(self.members.clone()));
            }
            ServerMessage::UserJoined { id, .. } => {
                if id == self.local_id || self.members.contains(&id) {
                    return;
                }
                self.members.push(id.clone());
                self.ensure_link_if_initiator(&id);
                self.emit(ConnectionEvent::MembersChanged(self.members.clone()));
            }
            ServerMessage::UserDisconnected { id } => {
                let was_member = self.members.contains(&id);
                self.members.retain(|member| member != &id);
                self.remove_link(&id);
                if was_member {
                    self.emit(ConnectionEvent::MembersChanged(self.members.clone()));
                }
            }
            ServerMessage::UpdateUserList { users } => {
                let remote: Vec<ClientId> = users
                    .iter()
                    .map(|user| user.id.clone())
                    .filter(|id| id != &self.local_id)
                    .collect();
                if remote != self.members {
                    self.members = remote;
                    self.drop_stale_links();
                    for remote in self.members.clone() {
                        self.ensure_link_if_initiator(&remote);
                    }
                    self.emit(ConnectionEvent::MembersChanged(self.members.clone()));
                }
                self.emit(ConnectionEvent::UserList(users));
            }
            ServerMessage::MicStateUpdate { slots } => {
                self.mic_slots = slots.clone();
                self.emit(ConnectionEvent::MicSlotsChanged(slots));
            }
            ServerMessage::Offer { from, sdp, .. } => self.on_offer(from, sdp),
            ServerMessage::Answer { from, sdp, .. } => {
                self.forward(&from, LinkCommand::Answer(sdp), "answer");
            }
            ServerMessage::IceCandidate {
                from, candidate, ..
            } => {
                self.forward(&from, LinkCommand::Candidate(candidate), "ice-candidate");
            }
            ServerMessage::Signal { from, signal, .. } => {
                self.emit(ConnectionEvent::Signal { from, signal });
            }
            ServerMessage::ChatMessage {
                from,
                username,
                message,
                timestamp,
            } => self.emit(ConnectionEvent::Chat {
                from,
                username,
                message,
                timestamp,
            }),
            ServerMessage::ForceMute { by } => {
                info!(by = %by, "Muted by room host");
                self.set_muted(true);
                self.emit(ConnectionEvent::ForceMuted { by });
            }
            ServerMessage::YouHaveBeenKicked { room_id } => {
                info!(room = %room_id, "Kicked from room");
                self.reset_room();
                self.emit(ConnectionEvent::Kicked { room_id });
            }
            ServerMessage::Error {
                code,
                message,
                target,
            } => {
                warn!(?code, %message, "Server reported error");
                if code == ErrorCode::TargetNotFound {
                    // The peer is already gone; stop negotiating with it.
                    if let Some(target) = &target {
                        self.remove_link(target);
                    }
                }
                self.emit(ConnectionEvent::ServerError {
                    code,
                    message,
                    target,
                });
            }
        }
    }

    fn on_offer(&mut self, from: ClientId, sdp: serde_json::Value) {
        if !self.members.contains(&from) {
            warn!(from = %from, "Offer from non-member ignored");
            return;
        }
        if is_initiator(&self.local_id, &from) {
            warn!(from = %from, "Offer from a peer we should be offering to, ignored");
            return;
        }
        if !self.links.contains_key(&from) {
            self.open_link(&from, false);
        }
        self.forward(&from, LinkCommand::Offer(sdp), "offer");
    }

    fn forward(&self, from: &ClientId, command: LinkCommand, kind: &str) {
        match self.links.get(from) {
            Some(link) => link.command(command),
            None => debug!(from = %from, kind, "No link for frame, ignored"),
        }
    }

    /// Apply a status report from a link task.
    pub(crate) fn handle_report(&mut self, report: LinkReport) {
        let current = self
            .links
            .get(&report.remote)
            .is_some_and(|link| link.generation == report.generation);
        if !current {
            debug!(remote = %report.remote, "Report from a retired link ignored");
            return;
        }
        match report.status {
            LinkStatus::Connected => {
                if let Some(link) = self.links.get_mut(&report.remote) {
                    link.connected = true;
                }
                info!(remote = %report.remote, "Peer connected");
                self.emit(ConnectionEvent::PeerConnected(report.remote));
            }
            LinkStatus::Failed(reason) => {
                if let Some(link) = self.links.remove(&report.remote) {
                    link.cancel();
                }
                warn!(remote = %report.remote, error = %reason, "Peer unreachable");
                self.emit(ConnectionEvent::PeerUnreachable {
                    remote: report.remote,
                    reason,
                });
            }
        }
    }

    fn ensure_link_if_initiator(&mut self, remote: &ClientId) {
        if is_initiator(&self.local_id, remote) && !self.links.contains_key(remote) {
            self.open_link(remote, true);
        }
    }

    fn open_link(&mut self, remote: &ClientId, initiator: bool) {
        self.next_generation += 1;
        let link = spawn_link(LinkSpawn {
            remote: remote.clone(),
            initiator,
            generation: self.next_generation,
            connector: Arc::clone(&self.connector),
            media: self.media.clone(),
            ice_servers: self.config.ice_servers.clone(),
            outbound: self.outbound.clone(),
            reports: self.reports_tx.clone(),
            handshake_timeout: self.config.handshake_timeout,
        });
        debug!(remote = %remote, initiator, "Link opened");
        self.links.insert(remote.clone(), link);
    }

    /// Tear down the link to `remote`. Safe to call when there is none.
    pub fn remove_link(&mut self, remote: &ClientId) -> bool {
        match self.links.remove(remote) {
            Some(link) => {
                link.cancel();
                debug!(remote = %remote, "Link closed");
                self.emit(ConnectionEvent::PeerClosed(remote.clone()));
                true
            }
            None => false,
        }
    }

    fn drop_stale_links(&mut self) {
        let stale: Vec<ClientId> = self
            .links
            .keys()
            .filter(|id| !self.members.contains(id))
            .cloned()
            .collect();
        for remote in stale {
            self.remove_link(&remote);
        }
    }

    fn reset_room(&mut self) {
        self.members.clear();
        self.mic_slots.clear();
        let remotes: Vec<ClientId> = self.links.keys().cloned().collect();
        for remote in remotes {
            self.remove_link(&remote);
        }
    }

    fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            warn!("Signaling connection closed, frame dropped");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Drive the manager until the server stream ends, then close every link.
    pub async fn run(
        mut self,
        mut server: mpsc::UnboundedReceiver<ServerMessage>,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                message = server.recv() => match message {
                    Some(message) => self.handle_server_message(message),
                    None => break,
                },
                Some(report) = self.reports_rx.recv() => self.handle_report(report),
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.apply_command(command),
                    None => commands_open = false,
                },
            }
        }
        info!(peers = self.links.len(), "Signaling stream ended, closing links");
        self.reset_room();
    }

    /// Run the manager on its own task.
    pub fn spawn(self, server: mpsc::UnboundedReceiver<ServerMessage>) -> ManagerHandle {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let media = self.media();
        let task = tokio::spawn(self.run(server, commands_rx));
        ManagerHandle {
            commands,
            media,
            task,
        }
    }
}

/// Handle to a manager running on its own task.
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    media: LocalMedia,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Returns `false` once the manager has stopped.
    pub fn send(&self, command: ManagerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn join_room(&self, room_id: &str, username: Option<String>) -> bool {
        self.send(ManagerCommand::JoinRoom {
            room_id: room_id.to_string(),
            username,
        })
    }

    /// Applied directly to the shared track, without a round trip through
    /// the manager task.
    pub fn set_muted(&self, muted: bool) {
        self.media.set_audio_enabled(!muted);
    }

    pub fn is_muted(&self) -> bool {
        !self.media.audio_enabled()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
