//! Session registry: maps client ids to their live outbound channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parley_common::{ClientId, ServerMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Frames a client may have waiting before it counts as unresponsive.
pub const OUTBOUND_QUEUE: usize = 256;

/// Outbound half of a client connection. Frames pushed here are written to
/// the socket by that connection's task, in order.
pub type Transport = mpsc::Sender<ServerMessage>;

/// A transport and the receiver its connection task drains.
pub fn transport() -> (Transport, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(OUTBOUND_QUEUE)
}

/// Produces candidate ids for new sessions.
pub type IdSource = Box<dyn FnMut() -> ClientId + Send>;

/// Give up on the configured id source after this many collisions and fall
/// back to a random UUID.
const MAX_ID_ATTEMPTS: usize = 8;

/// One live connection.
pub struct ClientSession {
    pub id: ClientId,
    transport: Transport,
    connected_at: Instant,
    /// Set once a frame was refused because the queue was full.
    lagging: AtomicBool,
}

impl ClientSession {
    /// Queue a frame for this client. Returns `false` if the connection task
    /// has gone away or stopped draining its queue.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.transport.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                if !self.lagging.swap(true, Ordering::Relaxed) {
                    warn!(client = %self.id, kind = message.kind(), "Outbound queue full");
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// The client stopped reading and has to be dropped.
    pub fn is_lagging(&self) -> bool {
        self.lagging.load(Ordering::Relaxed)
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Every connected client, keyed by its assigned id.
pub struct SessionRegistry {
    sessions: HashMap<ClientId, ClientSession>,
    next_id: IdSource,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_id_source(Box::new(ClientId::new))
    }

    /// Registry drawing ids from `source` instead of random UUIDs.
    pub fn with_id_source(source: IdSource) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: source,
        }
    }

    /// Bind a fresh id to `transport` and return it.
    pub fn register(&mut self, transport: Transport) -> ClientId {
        let id = self.fresh_id();
        self.sessions.insert(
            id.clone(),
            ClientSession {
                id: id.clone(),
                transport,
                connected_at: Instant::now(),
                lagging: AtomicBool::new(false),
            },
        );
        debug!(client = %id, sessions = self.sessions.len(), "Session registered");
        id
    }

    fn fresh_id(&mut self) -> ClientId {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = (self.next_id)();
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
            warn!(client = %candidate, "Id source produced a live id, retrying");
        }
        loop {
            let candidate = ClientId::new();
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Queue a frame for `id`. Returns `false` if there is no live session.
    pub fn send(&self, id: &ClientId, message: ServerMessage) -> bool {
        match self.sessions.get(id) {
            Some(session) => session.send(message),
            None => false,
        }
    }

    /// Sessions whose queue overflowed, in no particular order.
    pub fn lagging(&self) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|session| session.is_lagging())
            .map(|session| session.id.clone())
            .collect()
    }

    /// Remove a session. Calling this for an unknown id is a no-op.
    pub fn unregister(&mut self, id: &ClientId) -> Option<ClientSession> {
        let removed = self.sessions.remove(id);
        if let Some(session) = &removed {
            debug!(
                client = %id,
                sessions = self.sessions.len(),
                connected_ms = session.connected_for().as_millis() as u64,
                "Session unregistered"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Id source yielding `prefix1`, `prefix2`, ... Handy for tests and demos.
pub fn sequential_ids(prefix: &str) -> IdSource {
    let prefix = prefix.to_string();
    let mut next = 0u64;
    Box::new(move || {
        next += 1;
        ClientId::from(format!("{prefix}{next}"))
    })
}

/// Id source yielding exactly the given ids in order, then random UUIDs.
pub fn scripted_ids<I>(ids: I) -> IdSource
where
    I: IntoIterator<Item = &'static str>,
    I::IntoIter: Send + 'static,
{
    let mut ids = ids.into_iter();
    Box::new(move || ids.next().map(ClientId::from).unwrap_or_default())
}
