//! Snapshotting: periodic/manual backups, retention, and blob storage.

mod scheduler;
mod vault;

pub use scheduler::{CleanupReport, ScheduledRun, SchedulerHandle, SnapshotScheduler};
pub use vault::SnapshotVault;
