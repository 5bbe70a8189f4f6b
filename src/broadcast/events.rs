//! Events produced for the transport layer to deliver to clients.

use crate::types::{RoomId, Timestamp};
use serde::{Deserialize, Serialize};

/// What kind of change an event announces. Serialized to the wire names
/// clients switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "entity:update")]
    EntityUpdate,
    #[serde(rename = "version:restore")]
    VersionRestore,
    #[serde(rename = "comment:create")]
    CommentCreate,
    #[serde(rename = "comment:update")]
    CommentUpdate,
    #[serde(rename = "comment:delete")]
    CommentDelete,
}

/// A state-change notification.
///
/// Broadcast is always a side effect of an already-persisted mutation;
/// recipients that miss an event re-fetch authoritative state on
/// reconnect, so the event carries a summary payload, not the truth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub event: EventKind,
    pub room: RoomId,
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl ChangeEvent {
    pub fn new(event: EventKind, room: RoomId, payload: serde_json::Value) -> Self {
        Self {
            event,
            room,
            payload,
            timestamp: Timestamp::now(),
        }
    }
}
