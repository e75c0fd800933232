//! Room registry: room membership and per-room mic slots.
//!
//! A client belongs to at most one room at a time. Each room owns a
//! fixed-length array of mic slots that only its current members may occupy.
//! Rooms are created on first join and removed as soon as the last member
//! leaves.

use std::collections::HashMap;

use parley_common::{ClientId, MemberInfo, SignalError};
use tracing::{debug, info};

/// A room member, in join order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: ClientId,
    pub username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Room {
    id: String,
    members: Vec<Member>,
    slots: Vec<Option<ClientId>>,
}

impl Room {
    fn new(id: String, slot_count: usize) -> Self {
        Self {
            id,
            members: Vec::new(),
            slots: vec![None; slot_count],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.members.iter().any(|m| &m.id == client)
    }

    pub fn member(&self, client: &ClientId) -> Option<&Member> {
        self.members.iter().find(|m| &m.id == client)
    }

    /// Member ids in join order.
    pub fn member_ids(&self) -> Vec<ClientId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    pub fn member_info(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|m| MemberInfo {
                id: m.id.clone(),
                username: m.username.clone(),
            })
            .collect()
    }

    pub fn slots(&self) -> &[Option<ClientId>] {
        &self.slots
    }

    pub fn slot_of(&self, client: &ClientId) -> Option<usize> {
        self.slots.iter().position(|s| s.as_ref() == Some(client))
    }

    /// The occupant of slot 0 moderates the room.
    pub fn host(&self) -> Option<&ClientId> {
        self.slots.first().and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members present before the joiner, in join order.
    pub existing: Vec<ClientId>,
    /// `false` when the client was already a member of this room.
    pub newly_joined: bool,
    /// The room the client had to leave to join this one.
    pub left: Option<LeaveOutcome>,
}

/// What a departure changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: String,
    /// Members still in the room, in join order.
    pub remaining: Vec<ClientId>,
    /// Slot index the departed client was holding.
    pub released_slot: Option<usize>,
    /// The room was empty and has been removed.
    pub room_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrant {
    Assigned(usize),
    /// The client already held this slot; nothing changed.
    AlreadySeated(usize),
}

pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    /// Which room each client is in.
    memberships: HashMap<ClientId, String>,
    slot_count: usize,
}

impl RoomRegistry {
    pub fn new(slot_count: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            slot_count,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Add `client` to `room_id`, leaving its current room first if that is a
    /// different one. Joining the room the client is already in changes
    /// nothing.
    pub fn join(&mut self, room_id: &str, client: &ClientId, username: Option<String>) -> JoinOutcome {
        let current = self.memberships.get(client).cloned();
        let left = match current.as_deref() {
            Some(current) if current == room_id => {
                let existing = self
                    .rooms
                    .get(room_id)
                    .map(|room| {
                        room.members
                            .iter()
                            .filter(|m| &m.id != client)
                            .map(|m| m.id.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                return JoinOutcome {
                    existing,
                    newly_joined: false,
                    left: None,
                };
            }
            Some(_) => self.leave_current(client),
            None => None,
        };

        let slot_count = self.slot_count;
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(room = room_id, "Room created");
            Room::new(room_id.to_string(), slot_count)
        });
        let existing = room.member_ids();
        room.members.push(Member {
            id: client.clone(),
            username,
        });
        self.memberships.insert(client.clone(), room_id.to_string());
        debug!(room = room_id, client = %client, members = existing.len() + 1, "Joined room");

        JoinOutcome {
            existing,
            newly_joined: true,
            left,
        }
    }

    /// Remove `client` from `room_id`, releasing its slot. `None` if the
    /// client was not a member of that room.
    pub fn leave(&mut self, room_id: &str, client: &ClientId) -> Option<LeaveOutcome> {
        if self.memberships.get(client).map(String::as_str) != Some(room_id) {
            return None;
        }
        self.memberships.remove(client);

        let room = self.rooms.get_mut(room_id)?;
        room.members.retain(|m| &m.id != client);
        let released_slot = room.slot_of(client);
        if let Some(index) = released_slot {
            room.slots[index] = None;
        }
        let remaining = room.member_ids();
        let room_closed = room.is_empty();
        if room_closed {
            self.rooms.remove(room_id);
            info!(room = room_id, "Room closed (empty)");
        }
        debug!(room = room_id, client = %client, remaining = remaining.len(), "Left room");

        Some(LeaveOutcome {
            room_id: room_id.to_string(),
            remaining,
            released_slot,
            room_closed,
        })
    }

    /// Remove `client` from whatever room it is in.
    pub fn leave_current(&mut self, client: &ClientId) -> Option<LeaveOutcome> {
        let room_id = self.memberships.get(client)?.clone();
        self.leave(&room_id, client)
    }

    /// Seat `client` in the lowest-numbered empty slot of `room_id`.
    pub fn request_slot(&mut self, room_id: &str, client: &ClientId) -> Result<SlotGrant, SignalError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .filter(|room| room.contains(client))
            .ok_or(SignalError::NotInRoom)?;

        if let Some(index) = room.slot_of(client) {
            return Ok(SlotGrant::AlreadySeated(index));
        }
        let index = room
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| SignalError::RoomFull {
                room_id: room_id.to_string(),
            })?;
        room.slots[index] = Some(client.clone());
        debug!(room = room_id, client = %client, slot = index, "Mic slot assigned");
        Ok(SlotGrant::Assigned(index))
    }

    /// Free the slot `client` holds in `room_id`. `None` if it held none.
    pub fn release_slot(&mut self, room_id: &str, client: &ClientId) -> Option<usize> {
        let room = self.rooms.get_mut(room_id)?;
        let index = room.slot_of(client)?;
        room.slots[index] = None;
        debug!(room = room_id, client = %client, slot = index, "Mic slot released");
        Some(index)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// The room `client` is currently in.
    pub fn room_of(&self, client: &ClientId) -> Option<&Room> {
        self.memberships
            .get(client)
            .and_then(|room_id| self.rooms.get(room_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ClientId {
        ClientId::from(s)
    }

    #[test]
    fn first_join_creates_room_with_empty_snapshot() {
        let mut rooms = RoomRegistry::new(4);
        let outcome = rooms.join("lobby", &id("x1"), None);
        assert!(outcome.existing.is_empty());
        assert!(outcome.newly_joined);
        assert!(outcome.left.is_none());
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.room("lobby").unwrap().slots(), &[None, None, None, None]);
    }

    #[test]
    fn snapshot_lists_prior_members_in_join_order() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("b"), None);
        rooms.join("lobby", &id("a"), None);
        let outcome = rooms.join("lobby", &id("c"), None);
        assert_eq!(outcome.existing, vec![id("b"), id("a")]);
    }

    #[test]
    fn snapshot_tracks_join_and_leave_sequences() {
        let mut rooms = RoomRegistry::new(2);
        rooms.join("r", &id("a"), None);
        rooms.join("r", &id("b"), None);
        rooms.join("r", &id("c"), None);
        rooms.leave("r", &id("b"));
        rooms.join("r", &id("d"), None);
        rooms.leave("r", &id("a"));
        let outcome = rooms.join("r", &id("e"), None);
        assert_eq!(outcome.existing, vec![id("c"), id("d")]);
    }

    #[test]
    fn rejoining_same_room_is_a_no_op() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        rooms.join("lobby", &id("y1"), None);
        let outcome = rooms.join("lobby", &id("x1"), None);
        assert!(!outcome.newly_joined);
        assert_eq!(outcome.existing, vec![id("y1")]);
        assert_eq!(rooms.room("lobby").unwrap().len(), 2);
    }

    #[test]
    fn joining_another_room_leaves_the_first() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("a", &id("x1"), None);
        rooms.join("a", &id("y1"), None);
        rooms.request_slot("a", &id("x1")).unwrap();

        let outcome = rooms.join("b", &id("x1"), None);
        let left = outcome.left.unwrap();
        assert_eq!(left.room_id, "a");
        assert_eq!(left.remaining, vec![id("y1")]);
        assert_eq!(left.released_slot, Some(0));
        assert!(!left.room_closed);
        assert!(!rooms.room("a").unwrap().contains(&id("x1")));
        assert_eq!(rooms.room_of(&id("x1")).unwrap().id(), "b");
    }

    #[test]
    fn last_leave_reaps_room() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        let left = rooms.leave("lobby", &id("x1")).unwrap();
        assert!(left.room_closed);
        assert!(left.remaining.is_empty());
        assert!(rooms.room("lobby").is_none());
        assert_eq!(rooms.room_count(), 0);

        // Recreated fresh on the next join.
        let outcome = rooms.join("lobby", &id("y1"), None);
        assert!(outcome.existing.is_empty());
    }

    #[test]
    fn leave_of_non_member_is_none() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        assert!(rooms.leave("lobby", &id("y1")).is_none());
        assert!(rooms.leave("elsewhere", &id("x1")).is_none());
        assert!(rooms.leave_current(&id("nobody")).is_none());
        assert_eq!(rooms.room("lobby").unwrap().len(), 1);
    }

    #[test]
    fn slots_fill_lowest_empty_index_first() {
        let mut rooms = RoomRegistry::new(4);
        for c in ["a", "x", "y", "b"] {
            rooms.join("lobby", &id(c), None);
        }
        assert_eq!(rooms.request_slot("lobby", &id("a")), Ok(SlotGrant::Assigned(0)));
        assert_eq!(rooms.request_slot("lobby", &id("x")), Ok(SlotGrant::Assigned(1)));
        assert_eq!(rooms.request_slot("lobby", &id("y")), Ok(SlotGrant::Assigned(2)));
        assert_eq!(rooms.request_slot("lobby", &id("b")), Ok(SlotGrant::Assigned(3)));
        rooms.release_slot("lobby", &id("x"));
        rooms.release_slot("lobby", &id("y"));
        // [a, _, _, b]
        rooms.join("lobby", &id("c"), None);
        assert_eq!(rooms.request_slot("lobby", &id("c")), Ok(SlotGrant::Assigned(1)));
        assert_eq!(
            rooms.room("lobby").unwrap().slots(),
            &[Some(id("a")), Some(id("c")), None, Some(id("b"))]
        );
    }

    #[test]
    fn second_request_keeps_existing_slot() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        assert_eq!(rooms.request_slot("lobby", &id("x1")), Ok(SlotGrant::Assigned(0)));
        assert_eq!(
            rooms.request_slot("lobby", &id("x1")),
            Ok(SlotGrant::AlreadySeated(0))
        );
        assert_eq!(rooms.room("lobby").unwrap().slots(), &[Some(id("x1")), None, None, None]);
    }

    #[test]
    fn full_room_rejects_request() {
        let mut rooms = RoomRegistry::new(1);
        rooms.join("lobby", &id("x1"), None);
        rooms.join("lobby", &id("y1"), None);
        rooms.request_slot("lobby", &id("x1")).unwrap();
        assert_eq!(
            rooms.request_slot("lobby", &id("y1")),
            Err(SignalError::RoomFull {
                room_id: "lobby".into()
            })
        );
    }

    #[test]
    fn non_member_cannot_request_slot() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        assert_eq!(
            rooms.request_slot("lobby", &id("y1")),
            Err(SignalError::NotInRoom)
        );
        assert_eq!(
            rooms.request_slot("nowhere", &id("x1")),
            Err(SignalError::NotInRoom)
        );
    }

    #[test]
    fn release_without_slot_is_none() {
        let mut rooms = RoomRegistry::new(4);
        rooms.join("lobby", &id("x1"), None);
        assert_eq!(rooms.release_slot("lobby", &id("x1")), None);
        rooms.request_slot("lobby", &id("x1")).unwrap();
        assert_eq!(rooms.release_slot("lobby", &id("x1")), Some(0));
        assert_eq!(rooms.release_slot("lobby", &id("x1")), None);
    }

    #[test]
    fn host_is_slot_zero_occupant() {
        let mut rooms = RoomRegistry::new(2);
        rooms.join("lobby", &id("x1"), None);
        rooms.join("lobby", &id("y1"), None);
        assert_eq!(rooms.room("lobby").unwrap().host(), None);
        rooms.request_slot("lobby", &id("y1")).unwrap();
        assert_eq!(rooms.room("lobby").unwrap().host(), Some(&id("y1")));
    }

    #[test]
    fn member_info_carries_usernames() {
        let mut rooms = RoomRegistry::new(2);
        rooms.join("lobby", &id("x1"), Some("ali".into()));
        rooms.join("lobby", &id("y1"), None);
        let info = rooms.room("lobby").unwrap().member_info();
        assert_eq!(info[0].username.as_deref(), Some("ali"));
        assert_eq!(info[1].username, None);
    }
}
