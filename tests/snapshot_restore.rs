//! Snapshot and restore round trips through the hub.

use atelier::{
    ActorId, CoreError, EntityId, EntityKind, Hub, HubConfig, MemoryStorage, SnapshotId,
    SnapshotKind, SnapshotSubject,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_hub(dir: &TempDir) -> (Hub, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let config = HubConfig {
        vault_path: dir.path().join("vault"),
        ..Default::default()
    };
    (Hub::open(storage.clone(), config).unwrap(), storage)
}

fn seed_project(hub: &Hub) {
    let alice = ActorId::from("alice");
    hub.create(
        &alice,
        EntityKind::Project,
        None,
        EntityId::from("p-1"),
        json!({"title": "storyboard"}),
    )
    .unwrap();
    hub.create(
        &alice,
        EntityKind::Scene,
        Some(EntityId::from("p-1")),
        EntityId::from("s-1"),
        json!({"panel": "sketch"}),
    )
    .unwrap();
    hub.create(
        &alice,
        EntityKind::Comment,
        Some(EntityId::from("p-1")),
        EntityId::from("c-1"),
        json!({"text": "first pass"}),
    )
    .unwrap();
}

#[test]
fn test_snapshot_restore_round_trip_is_identity() {
    let dir = TempDir::new().unwrap();
    let (hub, _storage) = test_hub(&dir);
    seed_project(&hub);

    let before_scene = hub.entity(&EntityId::from("s-1")).unwrap();
    let snapshot = hub
        .create_snapshot(
            SnapshotSubject::Project(EntityId::from("p-1")),
            SnapshotKind::Manual,
        )
        .unwrap();

    // Nothing modified in between: restore changes nothing.
    let restored = hub
        .restore_snapshot(&ActorId::from("admin"), snapshot.id)
        .unwrap();
    assert_eq!(restored.changed, 0);
    assert_eq!(restored.recreated, 0);

    let after_scene = hub.entity(&EntityId::from("s-1")).unwrap();
    assert_eq!(before_scene, after_scene);
}

#[test]
fn test_restore_rolls_back_later_edits_and_notifies_room() {
    let dir = TempDir::new().unwrap();
    let (hub, _storage) = test_hub(&dir);
    seed_project(&hub);
    let alice = ActorId::from("alice");

    let snapshot = hub
        .create_snapshot(
            SnapshotSubject::Project(EntityId::from("p-1")),
            SnapshotKind::Manual,
        )
        .unwrap();

    hub.mutate(&alice, &EntityId::from("s-1"), 1, json!({"panel": "inked"}), None)
        .unwrap();
    hub.remove(&alice, &EntityId::from("c-1")).unwrap();

    // A member connects after the damage and watches the restore land.
    let viewer = hub.connect(ActorId::from("viewer"));
    hub.join_project_room(viewer.id, &EntityId::from("p-1"));

    let restored = hub
        .restore_snapshot(&ActorId::from("admin"), snapshot.id)
        .unwrap();
    assert_eq!(restored.projects, vec![EntityId::from("p-1")]);
    // The mutated scene changed back, the deleted comment was recreated.
    assert_eq!(restored.changed, 2);
    assert_eq!(restored.recreated, 1);

    let scene = hub.entity(&EntityId::from("s-1")).unwrap();
    assert_eq!(scene.payload, json!({"panel": "sketch"}));
    assert_eq!(scene.version, 3); // create + mutate + restore

    let comment = hub.entity(&EntityId::from("c-1")).unwrap();
    assert_eq!(comment.payload, json!({"text": "first pass"}));

    let event = viewer.recv_timeout(Duration::from_millis(100)).unwrap();
    let wire = serde_json::to_value(&event).unwrap();
    assert_eq!(wire["type"], "version:restore");
    assert_eq!(wire["payload"]["project"], "p-1");
}

#[test]
fn test_restore_failure_leaves_state_untouched() {
    let dir = TempDir::new().unwrap();
    let (hub, storage) = test_hub(&dir);
    seed_project(&hub);
    let alice = ActorId::from("alice");

    let snapshot = hub
        .create_snapshot(
            SnapshotSubject::Project(EntityId::from("p-1")),
            SnapshotKind::Manual,
        )
        .unwrap();
    hub.mutate(&alice, &EntityId::from("s-1"), 1, json!({"panel": "inked"}), None)
        .unwrap();

    storage.fail_next("replica lost quorum");
    let err = hub
        .restore_snapshot(&ActorId::from("admin"), snapshot.id)
        .unwrap_err();
    assert!(matches!(err, CoreError::RestoreTransactionFailed(_)));

    // Nothing observable changed: the edit survived the failed restore.
    let scene = hub.entity(&EntityId::from("s-1")).unwrap();
    assert_eq!(scene.payload, json!({"panel": "inked"}));
    assert_eq!(scene.version, 2);
}

#[test]
fn test_restore_unknown_snapshot_vs_transient_failure() {
    let dir = TempDir::new().unwrap();
    let (hub, _storage) = test_hub(&dir);

    // Not-found is distinguishable from transient failure, so clients know
    // whether retrying is useful.
    let err = hub
        .restore_snapshot(&ActorId::from("admin"), SnapshotId(404))
        .unwrap_err();
    assert!(matches!(err, CoreError::SnapshotNotFound(SnapshotId(404))));
}

#[test]
fn test_full_system_snapshot_restores_every_project() {
    let dir = TempDir::new().unwrap();
    let (hub, _storage) = test_hub(&dir);
    seed_project(&hub);
    let alice = ActorId::from("alice");
    hub.create(
        &alice,
        EntityKind::Project,
        None,
        EntityId::from("p-2"),
        json!({"title": "second board"}),
    )
    .unwrap();

    let snapshot = hub
        .create_snapshot(SnapshotSubject::Full, SnapshotKind::Manual)
        .unwrap();

    hub.mutate(&alice, &EntityId::from("p-2"), 1, json!({"title": "renamed"}), None)
        .unwrap();

    let restored = hub
        .restore_snapshot(&ActorId::from("admin"), snapshot.id)
        .unwrap();
    assert_eq!(restored.projects.len(), 2);

    let p2 = hub.entity(&EntityId::from("p-2")).unwrap();
    assert_eq!(p2.payload, json!({"title": "second board"}));
}

#[test]
fn test_scheduled_runs_then_cleanup() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let config = HubConfig {
        vault_path: dir.path().join("vault"),
        // Immediate expiry so the sweep has something to collect.
        snapshot_retention: Duration::ZERO,
        ..Default::default()
    };
    let hub = Hub::open(storage.clone(), config).unwrap();
    seed_project(&hub);

    let run = hub.scheduler().run_scheduled();
    assert_eq!(run.snapshots.len(), 1);
    assert_eq!(run.failed_subjects, 0);

    std::thread::sleep(Duration::from_millis(2));
    let report = hub.cleanup_expired();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, 0);

    // A second sweep finds nothing.
    assert_eq!(hub.cleanup_expired().deleted, 0);
}
