//! Core configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the synchronization core.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Directory holding snapshot blobs.
    pub vault_path: PathBuf,

    /// How long snapshots live before the retention sweep removes them.
    pub snapshot_retention: Duration,

    /// Interval between scheduled snapshot runs. Also the change window:
    /// a scheduled run only snapshots projects updated since the last run.
    pub scheduler_interval: Duration,

    /// Abort a subject export that takes longer than this.
    pub export_timeout: Duration,

    /// Max buffered events per session before the slow consumer is dropped.
    pub session_buffer: usize,

    /// Upper bound on a mutation payload, serialized.
    pub max_payload_bytes: usize,

    /// Capacity of the immutable version-record cache.
    pub version_cache_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("./snapshots"),
            snapshot_retention: Duration::from_secs(30 * 24 * 60 * 60),
            scheduler_interval: Duration::from_secs(5 * 60),
            export_timeout: Duration::from_secs(30),
            session_buffer: 1000,
            max_payload_bytes: 1024 * 1024,
            version_cache_size: 1024,
        }
    }
}
