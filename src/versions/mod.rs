//! Append-only per-entity version history.

mod store;

pub use store::{VersionDiff, VersionStore};
