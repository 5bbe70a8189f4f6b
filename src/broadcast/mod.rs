//! Change-event fan-out to connected sessions.

mod events;
mod router;

pub use events::{ChangeEvent, EventKind};
pub use router::{BroadcastRouter, Delivered};
