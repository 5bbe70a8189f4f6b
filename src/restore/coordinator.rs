//! Transactional multi-entity restore from a snapshot.

use crate::error::{CoreError, Result};
use crate::snapshots::SnapshotVault;
use crate::storage::{EntityWrite, NewVersion, RestorePlan, Storage};
use crate::types::{
    ActorId, BlobEncoding, Entity, RestoredSubject, SnapshotId, SubjectExport, Timestamp,
};
use std::sync::Arc;
use tracing::info;

/// Restores a subject tree from a snapshot in one storage transaction.
///
/// Upsert semantics: entities present in both the snapshot and current
/// storage are overwritten (payload from the snapshot, version counter
/// bumped by one so it never moves backwards); entities only in the
/// snapshot are recreated at their exported version. Each entity whose
/// payload actually changes gets exactly one version record describing the
/// restore. Either every write lands or none does.
pub struct RestoreCoordinator {
    storage: Arc<dyn Storage>,
    vault: Arc<SnapshotVault>,
}

impl RestoreCoordinator {
    pub fn new(storage: Arc<dyn Storage>, vault: Arc<SnapshotVault>) -> Self {
        Self { storage, vault }
    }

    /// Restore everything a snapshot captured.
    pub fn restore(&self, snapshot_id: SnapshotId, actor: &ActorId) -> Result<RestoredSubject> {
        let snapshot = self
            .storage
            .snapshot(snapshot_id)?
            .ok_or(CoreError::SnapshotNotFound(snapshot_id))?;

        let blob = self.vault.get(&snapshot.digest)?;
        let export = decode(&blob, snapshot.encoding)?;

        let (plan, changed, recreated) = self.build_plan(&export, snapshot_id, actor)?;
        let projects: Vec<_> = export.projects.iter().map(|p| p.project.id.clone()).collect();

        self.storage
            .apply_restore(plan)
            .map_err(|e| match e {
                CoreError::RestoreTransactionFailed(_) => e,
                other => CoreError::RestoreTransactionFailed(other.to_string()),
            })?;

        info!(
            snapshot = %snapshot_id,
            subject = %snapshot.subject,
            changed,
            recreated,
            "restore applied"
        );

        Ok(RestoredSubject {
            snapshot: snapshot_id,
            subject: snapshot.subject,
            projects,
            changed,
            recreated,
        })
    }

    /// Turn a decoded export into the transaction's write set. Pure
    /// read-and-plan: nothing is written here, so a failure at this stage
    /// observably changes nothing.
    fn build_plan(
        &self,
        export: &SubjectExport,
        snapshot_id: SnapshotId,
        actor: &ActorId,
    ) -> Result<(RestorePlan, usize, usize)> {
        let now = Timestamp::now();
        let mut plan = RestorePlan::default();
        let mut changed = 0;
        let mut recreated = 0;

        for exported in export.entities() {
            let current = self.storage.entity(&exported.id)?;
            let write = match current {
                Some(current) if current.payload == exported.payload => {
                    // Payload already matches: keep the live row, no record.
                    None
                }
                Some(current) => {
                    changed += 1;
                    Some(EntityWrite {
                        entity: Entity {
                            version: current.version + 1,
                            payload: exported.payload.clone(),
                            updated_at: now,
                            ..exported.clone()
                        },
                        version: Some(restore_record(exported, snapshot_id, actor, now)),
                    })
                }
                None => {
                    changed += 1;
                    recreated += 1;
                    Some(EntityWrite {
                        entity: Entity {
                            updated_at: now,
                            ..exported.clone()
                        },
                        version: Some(restore_record(exported, snapshot_id, actor, now)),
                    })
                }
            };
            if let Some(write) = write {
                plan.writes.push(write);
            }
        }

        for project in &export.projects {
            plan.member_projects.push(project.project.id.clone());
            plan.members.extend(project.members.iter().cloned());
        }

        Ok((plan, changed, recreated))
    }
}

fn restore_record(
    exported: &Entity,
    snapshot_id: SnapshotId,
    actor: &ActorId,
    now: Timestamp,
) -> NewVersion {
    NewVersion {
        entity_id: exported.id.clone(),
        payload: exported.payload.clone(),
        author: actor.clone(),
        created_at: now,
        change_description: Some(format!("Restored from snapshot {}", snapshot_id)),
    }
}

fn decode(blob: &[u8], encoding: BlobEncoding) -> Result<SubjectExport> {
    match encoding {
        BlobEncoding::Json => {
            serde_json::from_slice(blob).map_err(|e| CoreError::Deserialization(e.to_string()))
        }
        BlobEncoding::MessagePack => Ok(rmp_serde::from_slice(blob)?),
    }
}
