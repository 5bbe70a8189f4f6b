//! Compare-and-swap update protocol over the entity version counter.

use crate::error::{CoreError, Result};
use crate::storage::{CasOutcome, Storage};
use crate::types::{Entity, EntityId, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// Guards entity mutations with optimistic locking.
///
/// The check-and-increment is delegated to the storage collaborator's
/// conditional update, so two concurrent updates against the same entity
/// with the same expected version produce exactly one success and one
/// conflict. Conflicts are never retried here: the new state is
/// caller-supplied, so the caller must re-fetch before trying again.
pub struct OptimisticLockGuard {
    storage: Arc<dyn Storage>,
}

impl OptimisticLockGuard {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Apply a mutation if `expected` matches the persisted version.
    ///
    /// On success the version has been incremented by exactly 1 and the
    /// returned entity is the updated row. On mismatch the error carries
    /// the current authoritative version. Storage failures propagate
    /// without touching the version.
    pub fn update(
        &self,
        id: &EntityId,
        expected: u64,
        payload: serde_json::Value,
    ) -> Result<Entity> {
        match self
            .storage
            .compare_and_update(id, expected, payload, Timestamp::now())?
        {
            CasOutcome::Updated(entity) => Ok(entity),
            CasOutcome::Conflict { current } => {
                debug!(entity = %id, expected, current, "optimistic lock conflict");
                Err(CoreError::VersionConflict { current })
            }
            CasOutcome::Missing => Err(CoreError::EntityNotFound(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{Entity, EntityKind};
    use serde_json::json;

    fn guard_with_scene() -> (OptimisticLockGuard, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_entity(Entity {
                id: EntityId::from("s-1"),
                kind: EntityKind::Scene,
                parent: Some(EntityId::from("p-1")),
                version: 1,
                payload: json!({"panel": "a"}),
                updated_at: Timestamp::now(),
            })
            .unwrap();
        (OptimisticLockGuard::new(storage.clone()), storage)
    }

    #[test]
    fn test_update_increments_by_one() {
        let (guard, _storage) = guard_with_scene();

        let updated = guard
            .update(&EntityId::from("s-1"), 1, json!({"panel": "b"}))
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload, json!({"panel": "b"}));
    }

    #[test]
    fn test_stale_expected_version_conflicts_with_current() {
        let (guard, _storage) = guard_with_scene();
        guard
            .update(&EntityId::from("s-1"), 1, json!({"panel": "b"}))
            .unwrap();

        let err = guard
            .update(&EntityId::from("s-1"), 1, json!({"panel": "c"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::VersionConflict { current: 2 }));
    }

    #[test]
    fn test_missing_entity() {
        let (guard, _storage) = guard_with_scene();
        let err = guard
            .update(&EntityId::from("ghost"), 1, json!({}))
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityNotFound(_)));
    }

    #[test]
    fn test_storage_failure_leaves_version_untouched() {
        let (guard, storage) = guard_with_scene();
        storage.fail_next("transient outage");

        let err = guard
            .update(&EntityId::from("s-1"), 1, json!({"panel": "b"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        let entity = storage.entity(&EntityId::from("s-1")).unwrap().unwrap();
        assert_eq!(entity.version, 1);
        assert_eq!(entity.payload, json!({"panel": "a"}));
    }
}
