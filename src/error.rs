//! Error types for the synchronization core.

use crate::types::{EntityId, SnapshotId, VersionNumber};
use thiserror::Error;

/// Main error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Expected version did not match the persisted one. Carries the
    /// current authoritative version so the caller can re-fetch and retry.
    #[error("Version conflict: entity is at version {current}")]
    VersionConflict { current: u64 },

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Version not found: {entity} has no version {number}")]
    VersionNotFound {
        entity: EntityId,
        number: VersionNumber,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Entity already exists: {0}")]
    EntityExists(EntityId),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient or persistent backing-store failure. Surfaced, never
    /// silently swallowed; callers may retry with backoff.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The restore transaction rolled back; nothing observable changed.
    #[error("Restore transaction failed: {0}")]
    RestoreTransactionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Snapshot vault is locked by another process")]
    VaultLocked,

    #[error("Invalid vault format: {0}")]
    InvalidFormat(String),
}

impl CoreError {
    /// Whether retrying the operation could plausibly help.
    ///
    /// Conflicts are excluded on purpose: the new state is caller-supplied,
    /// so the caller must re-fetch before trying again.
    pub fn retryable(&self) -> bool {
        matches!(self, CoreError::Storage(_) | CoreError::Io(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
