//! Maps authenticated actors to live transport sessions and rooms.

use crate::broadcast::ChangeEvent;
use crate::types::{ActorId, RoomId, SessionId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct SessionEntry {
    actor: ActorId,
    rooms: HashSet<RoomId>,
    sender: Sender<ChangeEvent>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SessionEntry>,
    by_actor: HashMap<ActorId, HashSet<SessionId>>,
    rooms: HashMap<RoomId, HashSet<SessionId>>,
}

impl RegistryInner {
    fn remove_session(&mut self, id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&id)?;

        if let Some(ids) = self.by_actor.get_mut(&entry.actor) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_actor.remove(&entry.actor);
            }
        }
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(entry)
    }
}

/// Tracks live sessions, their owning actors, and room membership.
///
/// State lives only in process memory for the lifetime of a connection.
/// All three maps are kept consistent under a single lock, so a
/// disconnect removes the session from every room atomically with respect
/// to concurrent publishes: a publish either sees the session with its
/// live sender or not at all.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_id: AtomicU64::new(1),
            buffer_size,
        }
    }

    /// Register a transport connection for an already-verified actor.
    ///
    /// One actor may hold any number of concurrent sessions; each joins
    /// rooms independently.
    pub fn connect(&self, actor: ActorId) -> SessionHandle {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);

        let mut inner = self.inner.write();
        inner.sessions.insert(
            id,
            SessionEntry {
                actor: actor.clone(),
                rooms: HashSet::new(),
                sender,
            },
        );
        inner.by_actor.entry(actor).or_default().insert(id);

        SessionHandle { id, receiver }
    }

    /// Tear down a session and leave all of its rooms.
    ///
    /// Unknown ids are ignored: the transport may race its own teardown
    /// against a slow-consumer drop.
    pub fn disconnect(&self, id: SessionId) {
        if self.inner.write().remove_session(id).is_some() {
            debug!(session = %id, "session disconnected");
        }
    }

    /// Add a session to a room. Ignored for unknown sessions.
    pub fn join_room(&self, id: SessionId, room: RoomId) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return;
        };
        if entry.rooms.insert(room.clone()) {
            inner.rooms.entry(room).or_default().insert(id);
        }
    }

    /// Remove a session from a room. Ignored for unknown sessions.
    pub fn leave_room(&self, id: SessionId, room: &RoomId) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return;
        };
        if entry.rooms.remove(room) {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
    }

    /// All live sessions of an actor.
    pub fn sessions_for(&self, actor: &ActorId) -> HashSet<SessionId> {
        self.inner
            .read()
            .by_actor
            .get(actor)
            .cloned()
            .unwrap_or_default()
    }

    /// Current members of a room.
    pub fn members_of(&self, room: &RoomId) -> HashSet<SessionId> {
        self.inner
            .read()
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Snapshot of member senders, taken under one read lock so a publish
    /// never sees a session mid-teardown.
    pub(crate) fn room_senders(&self, room: &RoomId) -> Vec<(SessionId, Sender<ChangeEvent>)> {
        let inner = self.inner.read();
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                inner
                    .sessions
                    .get(id)
                    .map(|entry| (*id, entry.sender.clone()))
            })
            .collect()
    }

    /// Snapshot of an actor's senders across all of their sessions.
    pub(crate) fn actor_senders(&self, actor: &ActorId) -> Vec<(SessionId, Sender<ChangeEvent>)> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_actor.get(actor) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                inner
                    .sessions
                    .get(id)
                    .map(|entry| (*id, entry.sender.clone()))
            })
            .collect()
    }
}

/// Handle the transport layer holds for one session: the id to pass back
/// into room calls, and the receiving end of the event channel.
pub struct SessionHandle {
    pub id: SessionId,
    pub receiver: Receiver<ChangeEvent>,
}

impl SessionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChangeEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ChangeEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
