//! Storage collaborator seam.
//!
//! The core does not implement a storage engine. It talks to a
//! transactional relational store through the [`Storage`] trait: entity
//! rows keyed by id with a `version` column, an append-only version-record
//! table keyed `(entity_id, number)`, and a snapshot table with an indexed
//! `expires_at`. [`MemoryStorage`] is the in-process reference
//! implementation used by tests and embedders; every trait method is one
//! critical section, which is the same atomicity a single-statement
//! conditional update gives a SQL backend.

use crate::error::{CoreError, Result};
use crate::types::{
    ActorId, BlobDigest, BlobEncoding, Entity, EntityId, EntityKind, ProjectExport, ProjectMember,
    Snapshot, SnapshotId, SnapshotKind, SnapshotSubject, SubjectExport, Timestamp, VersionNumber,
    VersionRecord,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Outcome of the conditional update primitive.
#[derive(Clone, Debug)]
pub enum CasOutcome {
    /// Predicate held; the row was updated and the version incremented.
    Updated(Entity),
    /// The row exists but its version differs from the expected one.
    Conflict { current: u64 },
    /// No row with that id.
    Missing,
}

/// Input for appending a version record. The per-entity number is assigned
/// by the store, inside the same transaction as the append.
#[derive(Clone, Debug)]
pub struct NewVersion {
    pub entity_id: EntityId,
    pub payload: serde_json::Value,
    pub author: ActorId,
    pub created_at: Timestamp,
    pub change_description: Option<String>,
}

/// Input for inserting a snapshot metadata row.
#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub subject: SnapshotSubject,
    pub kind: SnapshotKind,
    pub digest: BlobDigest,
    pub encoding: BlobEncoding,
    pub size_bytes: u64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// One entity write inside a restore transaction.
#[derive(Clone, Debug)]
pub struct EntityWrite {
    pub entity: Entity,
    /// Version-record append for entities whose payload changes; `None`
    /// when the stored payload already matches the snapshot.
    pub version: Option<NewVersion>,
}

/// The full write set of a restore, applied all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct RestorePlan {
    pub writes: Vec<EntityWrite>,
    /// Projects whose membership rows are replaced by `members`.
    pub member_projects: Vec<EntityId>,
    pub members: Vec<ProjectMember>,
}

/// CRUD interface the core expects from its backing store.
pub trait Storage: Send + Sync {
    // --- Entities ---

    /// Insert a new entity row. Fails with `EntityExists` on id collision.
    fn insert_entity(&self, entity: Entity) -> Result<()>;

    /// Fetch an entity by id.
    fn entity(&self, id: &EntityId) -> Result<Option<Entity>>;

    /// Atomic check-and-increment: update the payload only if the stored
    /// version equals `expected`, bumping the version by exactly 1. Must be
    /// serialized against concurrent calls for the same id.
    fn compare_and_update(
        &self,
        id: &EntityId,
        expected: u64,
        payload: serde_json::Value,
        updated_at: Timestamp,
    ) -> Result<CasOutcome>;

    /// Delete an entity and, with it, its version records (they are owned
    /// by the entity and only removed on permanent deletion).
    fn delete_entity(&self, id: &EntityId) -> Result<()>;

    // --- Version records ---

    /// Append a version record, assigning the next per-entity number
    /// (sequential from 1).
    fn append_version(&self, draft: NewVersion) -> Result<VersionRecord>;

    /// Version records for an entity, newest first. Archived records are
    /// excluded unless `include_archived`.
    fn versions(&self, entity: &EntityId, include_archived: bool) -> Result<Vec<VersionRecord>>;

    /// Fetch one version record.
    fn version(&self, entity: &EntityId, number: VersionNumber) -> Result<Option<VersionRecord>>;

    /// Mark all but the `keep` most recent non-archived records archived,
    /// stamped with `at`. Returns how many were archived.
    fn archive_versions(&self, entity: &EntityId, keep: usize, at: Timestamp) -> Result<usize>;

    // --- Snapshots ---

    /// Insert a snapshot row, assigning its id.
    fn insert_snapshot(&self, snapshot: NewSnapshot) -> Result<Snapshot>;

    /// Fetch a snapshot row.
    fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>>;

    /// Snapshot rows whose `expires_at` is past `now`.
    fn expired_snapshots(&self, now: Timestamp) -> Result<Vec<Snapshot>>;

    /// Delete a snapshot row. Deleting an absent row is a no-op.
    fn delete_snapshot(&self, id: SnapshotId) -> Result<()>;

    // --- Membership ---

    /// Insert or replace a membership row.
    fn put_member(&self, member: ProjectMember) -> Result<()>;

    /// Membership rows for a project.
    fn members_of_project(&self, project: &EntityId) -> Result<Vec<ProjectMember>>;

    // --- Scheduling and restore support ---

    /// Projects whose subtree (project, scenes, comments) changed after
    /// `since`.
    fn projects_changed_since(&self, since: Timestamp) -> Result<Vec<EntityId>>;

    /// Read a subject's entire tree at one consistent point in time.
    fn export_subject(&self, subject: &SnapshotSubject) -> Result<SubjectExport>;

    /// Apply a restore write set in a single transaction: every write
    /// lands, or none does.
    fn apply_restore(&self, plan: RestorePlan) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    entities: HashMap<EntityId, Entity>,
    versions: HashMap<EntityId, Vec<VersionRecord>>,
    snapshots: BTreeMap<u64, Snapshot>,
    members: HashMap<EntityId, Vec<ProjectMember>>,
    next_snapshot_id: u64,
    fail_next: Option<String>,
}

impl MemoryInner {
    fn take_fault(&mut self) -> Result<()> {
        if let Some(reason) = self.fail_next.take() {
            return Err(CoreError::Storage(reason));
        }
        Ok(())
    }

    fn append_version_locked(&mut self, draft: NewVersion) -> VersionRecord {
        let log = self.versions.entry(draft.entity_id.clone()).or_default();
        let number = log
            .iter()
            .map(|r| r.number)
            .max()
            .map(VersionNumber::next)
            .unwrap_or(VersionNumber(1));

        let record = VersionRecord {
            entity_id: draft.entity_id,
            number,
            payload: draft.payload,
            author: draft.author,
            created_at: draft.created_at,
            change_description: draft.change_description,
            archived: false,
            archived_at: None,
        };
        log.push(record.clone());
        record
    }

    fn export_project_locked(&self, id: &EntityId) -> Result<ProjectExport> {
        let project = self
            .entities
            .get(id)
            .filter(|e| e.kind == EntityKind::Project)
            .cloned()
            .ok_or_else(|| CoreError::EntityNotFound(id.clone()))?;

        let mut scenes = Vec::new();
        let mut comments = Vec::new();
        for entity in self.entities.values() {
            if entity.parent.as_ref() == Some(id) {
                match entity.kind {
                    EntityKind::Scene => scenes.push(entity.clone()),
                    EntityKind::Comment => comments.push(entity.clone()),
                    EntityKind::Project => {}
                }
            }
        }
        scenes.sort_by(|a, b| a.id.cmp(&b.id));
        comments.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(ProjectExport {
            project,
            scenes,
            comments,
            members: self.members.get(id).cloned().unwrap_or_default(),
        })
    }
}

/// In-memory transactional store.
///
/// One mutex guards all tables, so each trait method executes as a single
/// transaction and the conditional update is serialized per store, which
/// subsumes per-entity serialization.
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Make the next mutating call fail with `CoreError::Storage(reason)`.
    /// Lets tests exercise rollback and retry paths.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next = Some(reason.into());
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn insert_entity(&self, entity: Entity) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        if inner.entities.contains_key(&entity.id) {
            return Err(CoreError::EntityExists(entity.id));
        }
        inner.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    fn entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        Ok(self.inner.lock().entities.get(id).cloned())
    }

    fn compare_and_update(
        &self,
        id: &EntityId,
        expected: u64,
        payload: serde_json::Value,
        updated_at: Timestamp,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        match inner.entities.get_mut(id) {
            None => Ok(CasOutcome::Missing),
            Some(entity) if entity.version != expected => Ok(CasOutcome::Conflict {
                current: entity.version,
            }),
            Some(entity) => {
                entity.version += 1;
                entity.payload = payload;
                entity.updated_at = updated_at;
                Ok(CasOutcome::Updated(entity.clone()))
            }
        }
    }

    fn delete_entity(&self, id: &EntityId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        if inner.entities.remove(id).is_none() {
            return Err(CoreError::EntityNotFound(id.clone()));
        }
        inner.versions.remove(id);
        inner.members.remove(id);
        Ok(())
    }

    fn append_version(&self, draft: NewVersion) -> Result<VersionRecord> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        Ok(inner.append_version_locked(draft))
    }

    fn versions(&self, entity: &EntityId, include_archived: bool) -> Result<Vec<VersionRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner
            .versions
            .get(entity)
            .map(|log| {
                log.iter()
                    .filter(|r| include_archived || !r.archived)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a: &VersionRecord, b: &VersionRecord| b.number.cmp(&a.number));
        Ok(records)
    }

    fn version(&self, entity: &EntityId, number: VersionNumber) -> Result<Option<VersionRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .versions
            .get(entity)
            .and_then(|log| log.iter().find(|r| r.number == number))
            .cloned())
    }

    fn archive_versions(&self, entity: &EntityId, keep: usize, at: Timestamp) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        let Some(log) = inner.versions.get_mut(entity) else {
            return Ok(0);
        };

        let mut live: Vec<&mut VersionRecord> =
            log.iter_mut().filter(|r| !r.archived).collect();
        live.sort_by(|a, b| b.number.cmp(&a.number));

        let mut archived = 0;
        for record in live.into_iter().skip(keep) {
            record.archived = true;
            record.archived_at = Some(at);
            archived += 1;
        }
        Ok(archived)
    }

    fn insert_snapshot(&self, snapshot: NewSnapshot) -> Result<Snapshot> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        inner.next_snapshot_id += 1;
        let row = Snapshot {
            id: SnapshotId(inner.next_snapshot_id),
            subject: snapshot.subject,
            kind: snapshot.kind,
            digest: snapshot.digest,
            encoding: snapshot.encoding,
            size_bytes: snapshot.size_bytes,
            created_at: snapshot.created_at,
            expires_at: snapshot.expires_at,
        };
        inner.snapshots.insert(row.id.0, row.clone());
        Ok(row)
    }

    fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>> {
        Ok(self.inner.lock().snapshots.get(&id.0).cloned())
    }

    fn expired_snapshots(&self, now: Timestamp) -> Result<Vec<Snapshot>> {
        let inner = self.inner.lock();
        Ok(inner
            .snapshots
            .values()
            .filter(|s| s.expires_at < now)
            .cloned()
            .collect())
    }

    fn delete_snapshot(&self, id: SnapshotId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        inner.snapshots.remove(&id.0);
        Ok(())
    }

    fn put_member(&self, member: ProjectMember) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_fault()?;
        let rows = inner.members.entry(member.project.clone()).or_default();
        if let Some(existing) = rows.iter_mut().find(|m| m.actor == member.actor) {
            *existing = member;
        } else {
            rows.push(member);
        }
        Ok(())
    }

    fn members_of_project(&self, project: &EntityId) -> Result<Vec<ProjectMember>> {
        Ok(self
            .inner
            .lock()
            .members
            .get(project)
            .cloned()
            .unwrap_or_default())
    }

    fn projects_changed_since(&self, since: Timestamp) -> Result<Vec<EntityId>> {
        let inner = self.inner.lock();
        let mut changed: Vec<EntityId> = inner
            .entities
            .values()
            .filter(|e| e.updated_at > since)
            .map(|e| e.owning_project().clone())
            .filter(|id| {
                inner
                    .entities
                    .get(id)
                    .is_some_and(|e| e.kind == EntityKind::Project)
            })
            .collect();
        changed.sort();
        changed.dedup();
        Ok(changed)
    }

    fn export_subject(&self, subject: &SnapshotSubject) -> Result<SubjectExport> {
        // Single lock acquisition = one consistent read snapshot.
        let inner = self.inner.lock();
        let projects = match subject {
            SnapshotSubject::Project(id) => vec![inner.export_project_locked(id)?],
            SnapshotSubject::Full => {
                let mut ids: Vec<EntityId> = inner
                    .entities
                    .values()
                    .filter(|e| e.kind == EntityKind::Project)
                    .map(|e| e.id.clone())
                    .collect();
                ids.sort();
                ids.iter()
                    .map(|id| inner.export_project_locked(id))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(SubjectExport {
            subject: subject.clone(),
            projects,
            exported_at: Timestamp::now(),
        })
    }

    fn apply_restore(&self, plan: RestorePlan) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .take_fault()
            .map_err(|e| CoreError::RestoreTransactionFailed(e.to_string()))?;

        // All writes happen under the one lock, after validation; a failure
        // before this point leaves the tables untouched.
        for write in plan.writes {
            if let Some(draft) = write.version {
                inner.append_version_locked(draft);
            }
            inner.entities.insert(write.entity.id.clone(), write.entity);
        }
        for project in &plan.member_projects {
            inner.members.remove(project);
        }
        for member in plan.members {
            inner
                .members
                .entry(member.project.clone())
                .or_default()
                .push(member);
        }
        Ok(())
    }
}
