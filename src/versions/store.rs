//! Append-only per-entity version log with archiving.

use crate::error::{CoreError, Result};
use crate::storage::{NewVersion, Storage};
use crate::types::{ActorId, EntityId, Timestamp, VersionNumber, VersionRecord};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::info;

/// Two version records side by side, with the fields that differ.
#[derive(Clone, Debug)]
pub struct VersionDiff {
    pub a: VersionRecord,
    pub b: VersionRecord,
    pub payload_changed: bool,
    pub author_changed: bool,
}

/// Append-only version history over the storage collaborator.
///
/// Records are immutable once written (archival flags aside), so an LRU
/// cache in front of `get` is safe; the mutable entity row is never cached.
pub struct VersionStore {
    storage: Arc<dyn Storage>,
    cache: Mutex<LruCache<(EntityId, VersionNumber), VersionRecord>>,
}

impl VersionStore {
    pub fn new(storage: Arc<dyn Storage>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap();
        Self {
            storage,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Append a new version record. The per-entity number is assigned by
    /// the store, sequential from 1.
    pub fn append(
        &self,
        entity_id: &EntityId,
        payload: serde_json::Value,
        author: &ActorId,
        description: Option<String>,
    ) -> Result<VersionRecord> {
        self.storage.append_version(NewVersion {
            entity_id: entity_id.clone(),
            payload,
            author: author.clone(),
            created_at: Timestamp::now(),
            change_description: description,
        })
    }

    /// Version records newest first, archived excluded.
    pub fn list(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        self.storage.versions(entity_id, false)
    }

    /// Version records newest first, archived included.
    pub fn list_all(&self, entity_id: &EntityId) -> Result<Vec<VersionRecord>> {
        self.storage.versions(entity_id, true)
    }

    /// Fetch one record, going to storage only on cache miss.
    ///
    /// Archived records are still retrievable here; archiving only affects
    /// the default listing.
    pub fn get(&self, entity_id: &EntityId, number: VersionNumber) -> Result<VersionRecord> {
        let key = (entity_id.clone(), number);
        if let Some(record) = self.cache.lock().get(&key) {
            return Ok(record.clone());
        }

        let record = self
            .storage
            .version(entity_id, number)?
            .ok_or_else(|| CoreError::VersionNotFound {
                entity: entity_id.clone(),
                number,
            })?;

        // Archival flags can still flip, so only settled records are cached.
        if record.archived {
            self.cache.lock().put(key, record.clone());
        }
        Ok(record)
    }

    /// Fetch two records of the same entity for comparison.
    pub fn compare(
        &self,
        entity_id: &EntityId,
        a: VersionNumber,
        b: VersionNumber,
    ) -> Result<VersionDiff> {
        let a = self.get(entity_id, a)?;
        let b = self.get(entity_id, b)?;
        Ok(VersionDiff {
            payload_changed: a.payload != b.payload,
            author_changed: a.author != b.author,
            a,
            b,
        })
    }

    /// Keep the `keep` most recent non-archived records; mark the rest
    /// archived with a single shared timestamp. Returns how many were
    /// archived.
    pub fn archive_older_than(&self, entity_id: &EntityId, keep: usize) -> Result<usize> {
        let archived = self
            .storage
            .archive_versions(entity_id, keep, Timestamp::now())?;
        if archived > 0 {
            info!(entity = %entity_id, archived, keep, "archived old versions");
        }
        Ok(archived)
    }
}
