//! Fire-and-forget event delivery to room members.

use crate::broadcast::ChangeEvent;
use crate::registry::ConnectionRegistry;
use crate::types::{ActorId, RoomId, SessionId};
use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// How one publish call went.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivered {
    /// Sessions the event was handed to.
    pub delivered: usize,
    /// Slow or dead sessions dropped from the registry instead.
    pub dropped: usize,
}

/// Delivers change events to the current members of a room.
///
/// Delivery is at-most-once per session per publish call: each member gets
/// one `try_send`, and a member whose buffer is full or whose receiver is
/// gone is dropped from the registry rather than retried (recipients
/// re-fetch authoritative state on reconnect). Per-room FIFO channels
/// preserve the publish order each member observes. `publish` never
/// touches entity, version, or snapshot state.
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send an event to every current member of its room.
    pub fn publish(&self, event: ChangeEvent) -> Delivered {
        let targets = self.registry.room_senders(&event.room);
        self.send_all(targets, event)
    }

    /// Send an event to every session of one actor, regardless of rooms.
    pub fn notify_actor(&self, actor: &ActorId, event: ChangeEvent) -> Delivered {
        let targets = self.registry.actor_senders(actor);
        self.send_all(targets, event)
    }

    /// Current membership, for callers that only need the fan-out set.
    pub fn members_of(&self, room: &RoomId) -> HashSet<SessionId> {
        self.registry.members_of(room)
    }

    fn send_all(
        &self,
        targets: Vec<(SessionId, Sender<ChangeEvent>)>,
        event: ChangeEvent,
    ) -> Delivered {
        let mut result = Delivered::default();
        let mut to_drop = Vec::new();

        for (session, sender) in targets {
            if sender.try_send(event.clone()).is_ok() {
                result.delivered += 1;
            } else {
                to_drop.push(session);
            }
        }

        // A failed send never aborts delivery to the other members; the
        // failing session is simply torn down.
        for session in to_drop {
            debug!(session = %session, room = %event.room, "dropping unreachable session");
            self.registry.disconnect(session);
            result.dropped += 1;
        }

        result
    }
}
