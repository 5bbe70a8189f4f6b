//! # Atelier
//!
//! Concurrent versioning and synchronization core for collaborative
//! editing: optimistic-concurrency mutation, append-only version history
//! with archiving, periodic and manual snapshotting with transactional
//! restore, and room-scoped change broadcasting to connected clients.
//!
//! ## Core Concepts
//!
//! - **Entities**: Versioned resources (projects, scenes, comments) with a
//!   strictly monotonic version counter
//! - **Version records**: Immutable per-entity history, appended on every
//!   successful mutation
//! - **Snapshots**: Consistent point-in-time exports of a project subtree,
//!   restorable in one transaction
//! - **Rooms**: Broadcast scopes fanning change events out to sessions,
//!   at most once per publish
//!
//! ## Example
//!
//! ```ignore
//! use atelier::{ActorId, EntityId, EntityKind, Hub, HubConfig, MemoryStorage};
//! use std::sync::Arc;
//!
//! let hub = Hub::open(Arc::new(MemoryStorage::new()), HubConfig::default())?;
//! let alice = ActorId::from("alice");
//!
//! hub.create(&alice, EntityKind::Project, None, EntityId::from("p-1"),
//!     serde_json::json!({"title": "storyboard"}))?;
//!
//! // Optimistic mutation: succeeds only against the current version.
//! let scene = hub.mutate(&alice, &EntityId::from("p-1"), 1,
//!     serde_json::json!({"title": "storyboard, take 2"}), None)?;
//! assert_eq!(scene.version, 2);
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod hub;
pub mod lock;
pub mod policy;
pub mod registry;
pub mod restore;
pub mod snapshots;
pub mod storage;
pub mod types;
pub mod versions;

// Re-exports
pub use broadcast::{BroadcastRouter, ChangeEvent, Delivered, EventKind};
pub use config::HubConfig;
pub use error::{CoreError, Result};
pub use hub::Hub;
pub use lock::OptimisticLockGuard;
pub use policy::{with_retry, RetryPolicy};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use restore::RestoreCoordinator;
pub use snapshots::{
    CleanupReport, ScheduledRun, SchedulerHandle, SnapshotScheduler, SnapshotVault,
};
pub use storage::{
    CasOutcome, EntityWrite, MemoryStorage, NewSnapshot, NewVersion, RestorePlan, Storage,
};
pub use types::*;
pub use versions::{VersionDiff, VersionStore};
