//! Hub tying the core components together.
//!
//! This is the surface the transport and authorization layers talk to: a
//! mutation entry point that runs the optimistic-lock / version-history /
//! broadcast pipeline, snapshot and restore triggers, and connection
//! lifecycle pass-throughs. Callers arrive already authorized; the hub
//! never checks identity.

use crate::broadcast::{BroadcastRouter, ChangeEvent, EventKind};
use crate::config::HubConfig;
use crate::error::{CoreError, Result};
use crate::lock::OptimisticLockGuard;
use crate::registry::{ConnectionRegistry, SessionHandle};
use crate::restore::RestoreCoordinator;
use crate::snapshots::{CleanupReport, SchedulerHandle, SnapshotScheduler, SnapshotVault};
use crate::storage::Storage;
use crate::types::{
    ActorId, Entity, EntityId, EntityKind, RestoredSubject, RoomId, SessionId, Snapshot,
    SnapshotId, SnapshotKind, SnapshotSubject, Timestamp, VersionNumber,
};
use crate::versions::VersionStore;
use serde_json::json;
use std::sync::Arc;

/// The synchronization core.
///
/// A mutation flows through validation, then the conditional update, then
/// exactly one version record and exactly one broadcast to the owning
/// project's room. Snapshots and restores run beside that pipeline against
/// the same storage collaborator.
pub struct Hub {
    config: HubConfig,
    storage: Arc<dyn Storage>,
    guard: OptimisticLockGuard,
    versions: VersionStore,
    scheduler: Arc<SnapshotScheduler>,
    coordinator: RestoreCoordinator,
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
}

impl Hub {
    /// Build a hub over a storage collaborator, opening the snapshot vault
    /// at the configured path.
    pub fn open(storage: Arc<dyn Storage>, config: HubConfig) -> Result<Self> {
        let vault = Arc::new(SnapshotVault::open(&config.vault_path)?);
        let scheduler = Arc::new(SnapshotScheduler::new(
            Arc::clone(&storage),
            Arc::clone(&vault),
            config.snapshot_retention,
            config.scheduler_interval,
            config.export_timeout,
        ));
        let registry = Arc::new(ConnectionRegistry::new(config.session_buffer));

        Ok(Self {
            guard: OptimisticLockGuard::new(Arc::clone(&storage)),
            versions: VersionStore::new(Arc::clone(&storage), config.version_cache_size),
            coordinator: RestoreCoordinator::new(Arc::clone(&storage), vault),
            router: BroadcastRouter::new(Arc::clone(&registry)),
            scheduler,
            registry,
            storage,
            config,
        })
    }

    // --- Entity lifecycle ---

    /// Create an entity at version 1, with its first version record, and
    /// announce it to the owning project's room.
    pub fn create(
        &self,
        actor: &ActorId,
        kind: EntityKind,
        parent: Option<EntityId>,
        id: EntityId,
        payload: serde_json::Value,
    ) -> Result<Entity> {
        self.validate_payload(&payload)?;
        if id.as_str().is_empty() {
            return Err(CoreError::Validation("entity id must not be empty".into()));
        }
        match (kind, &parent) {
            (EntityKind::Project, Some(_)) => {
                return Err(CoreError::Validation("a project cannot have a parent".into()));
            }
            (EntityKind::Project, None) => {}
            (_, None) => {
                return Err(CoreError::Validation(format!(
                    "a {} must belong to a project",
                    kind
                )));
            }
            (_, Some(parent)) => {
                let owner = self
                    .storage
                    .entity(parent)?
                    .ok_or_else(|| CoreError::EntityNotFound(parent.clone()))?;
                if owner.kind != EntityKind::Project {
                    return Err(CoreError::Validation(format!(
                        "parent {} is not a project",
                        parent
                    )));
                }
            }
        }

        let entity = Entity {
            id,
            kind,
            parent,
            version: 1,
            payload,
            updated_at: Timestamp::now(),
        };
        self.storage.insert_entity(entity.clone())?;
        self.versions.append(
            &entity.id,
            entity.payload.clone(),
            actor,
            Some("Created".into()),
        )?;

        let event_kind = match kind {
            EntityKind::Comment => EventKind::CommentCreate,
            _ => EventKind::EntityUpdate,
        };
        self.announce(&entity, event_kind);
        Ok(entity)
    }

    /// The mutation entry point: apply a payload change if
    /// `expected_version` still matches.
    ///
    /// On success the entity's version has grown by exactly 1, exactly one
    /// version record exists for the change, and exactly one event went
    /// out. On conflict the error carries the current version for caller
    /// reconciliation.
    pub fn mutate(
        &self,
        actor: &ActorId,
        id: &EntityId,
        expected_version: u64,
        payload: serde_json::Value,
        description: Option<String>,
    ) -> Result<Entity> {
        self.validate_payload(&payload)?;

        let entity = self.guard.update(id, expected_version, payload)?;
        self.versions
            .append(id, entity.payload.clone(), actor, description)?;

        let event_kind = match entity.kind {
            EntityKind::Comment => EventKind::CommentUpdate,
            _ => EventKind::EntityUpdate,
        };
        self.announce(&entity, event_kind);
        Ok(entity)
    }

    /// Permanently delete an entity together with its version history.
    pub fn remove(&self, _actor: &ActorId, id: &EntityId) -> Result<()> {
        let entity = self
            .storage
            .entity(id)?
            .ok_or_else(|| CoreError::EntityNotFound(id.clone()))?;
        self.storage.delete_entity(id)?;

        if entity.kind == EntityKind::Comment {
            let room = RoomId::project(entity.owning_project());
            self.router.publish(ChangeEvent::new(
                EventKind::CommentDelete,
                room,
                json!({ "id": entity.id }),
            ));
        }
        Ok(())
    }

    /// Fetch current entity state (what clients re-read after a missed
    /// broadcast).
    pub fn entity(&self, id: &EntityId) -> Result<Entity> {
        self.storage
            .entity(id)?
            .ok_or_else(|| CoreError::EntityNotFound(id.clone()))
    }

    // --- Version history ---

    /// Roll an entity back to one of its recorded versions.
    ///
    /// Appends exactly one new record, at a new higher number, carrying
    /// the restored payload, so the rollback itself stays in history and
    /// the pre-restore state remains the previous record.
    pub fn restore_version(
        &self,
        actor: &ActorId,
        id: &EntityId,
        number: VersionNumber,
    ) -> Result<Entity> {
        let record = self.versions.get(id, number)?;
        let current = self.entity(id)?;

        let entity = self
            .guard
            .update(id, current.version, record.payload.clone())?;
        self.versions.append(
            id,
            record.payload,
            actor,
            Some(format!("Restored from version {}", number)),
        )?;

        self.announce(&entity, EventKind::VersionRestore);
        Ok(entity)
    }

    /// The version history component, for listing/compare/archive calls.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    // --- Snapshots and restore ---

    /// Snapshot a subject now. Manual/explicit calls always run,
    /// regardless of recent-change state.
    pub fn create_snapshot(
        &self,
        subject: SnapshotSubject,
        kind: SnapshotKind,
    ) -> Result<Snapshot> {
        self.scheduler.create_snapshot(subject, kind)
    }

    /// Restore everything a snapshot captured, then tell each restored
    /// project's room to re-fetch.
    pub fn restore_snapshot(
        &self,
        actor: &ActorId,
        snapshot_id: SnapshotId,
    ) -> Result<RestoredSubject> {
        let restored = self.coordinator.restore(snapshot_id, actor)?;
        for project in &restored.projects {
            self.router.publish(ChangeEvent::new(
                EventKind::VersionRestore,
                RoomId::project(project),
                json!({ "snapshot": snapshot_id, "project": project }),
            ));
        }
        Ok(restored)
    }

    /// Sweep expired snapshots.
    pub fn cleanup_expired(&self) -> CleanupReport {
        self.scheduler.cleanup_expired()
    }

    /// Start the periodic snapshot/retention loop. The loop stops when the
    /// returned handle drops.
    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        Arc::clone(&self.scheduler).spawn(self.config.scheduler_interval)
    }

    /// The scheduler component, for explicit `run_scheduled` calls.
    pub fn scheduler(&self) -> &SnapshotScheduler {
        &self.scheduler
    }

    // --- Connection lifecycle ---

    /// Transport connect, after upstream identity verification.
    pub fn connect(&self, actor: ActorId) -> SessionHandle {
        self.registry.connect(actor)
    }

    pub fn disconnect(&self, session: SessionId) {
        self.registry.disconnect(session);
    }

    /// Join the room of a project to start receiving its change events.
    pub fn join_project_room(&self, session: SessionId, project: &EntityId) {
        self.registry.join_room(session, RoomId::project(project));
    }

    pub fn leave_project_room(&self, session: SessionId, project: &EntityId) {
        self.registry.leave_room(session, &RoomId::project(project));
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    // --- Internals ---

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        if !payload.is_object() {
            return Err(CoreError::Validation(
                "payload must be a JSON object".into(),
            ));
        }
        let size = serde_json::to_vec(payload)?.len();
        if size > self.config.max_payload_bytes {
            return Err(CoreError::Validation(format!(
                "payload of {} bytes exceeds the {} byte limit",
                size, self.config.max_payload_bytes
            )));
        }
        Ok(())
    }

    fn announce(&self, entity: &Entity, kind: EventKind) {
        let room = RoomId::project(entity.owning_project());
        self.router.publish(ChangeEvent::new(
            kind,
            room,
            json!({
                "id": entity.id,
                "kind": entity.kind,
                "version": entity.version,
                "payload": entity.payload,
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tempfile::TempDir;

    fn hub(dir: &TempDir) -> Hub {
        let config = HubConfig {
            vault_path: dir.path().join("vault"),
            ..Default::default()
        };
        Hub::open(Arc::new(MemoryStorage::new()), config).unwrap()
    }

    #[test]
    fn test_create_rejects_orphan_scene() {
        let dir = TempDir::new().unwrap();
        let hub = hub(&dir);

        let err = hub
            .create(
                &ActorId::from("alice"),
                EntityKind::Scene,
                None,
                EntityId::from("s-1"),
                json!({}),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_create_rejects_non_project_parent() {
        let dir = TempDir::new().unwrap();
        let hub = hub(&dir);
        hub.create(
            &ActorId::from("alice"),
            EntityKind::Project,
            None,
            EntityId::from("p-1"),
            json!({}),
        )
        .unwrap();
        hub.create(
            &ActorId::from("alice"),
            EntityKind::Scene,
            Some(EntityId::from("p-1")),
            EntityId::from("s-1"),
            json!({}),
        )
        .unwrap();

        let err = hub
            .create(
                &ActorId::from("alice"),
                EntityKind::Comment,
                Some(EntityId::from("s-1")),
                EntityId::from("c-1"),
                json!({}),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_validation_happens_before_storage() {
        let dir = TempDir::new().unwrap();
        let hub = hub(&dir);

        let err = hub
            .mutate(
                &ActorId::from("alice"),
                &EntityId::from("s-1"),
                1,
                json!("not an object"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = HubConfig {
            vault_path: dir.path().join("vault"),
            max_payload_bytes: 64,
            ..Default::default()
        };
        let hub = Hub::open(Arc::new(MemoryStorage::new()), config).unwrap();

        let big = json!({ "data": "x".repeat(256) });
        let err = hub
            .create(
                &ActorId::from("alice"),
                EntityKind::Project,
                None,
                EntityId::from("p-1"),
                big,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
