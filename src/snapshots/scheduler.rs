//! Periodic and on-demand snapshotting with retention.

use crate::error::{CoreError, Result};
use crate::policy::{with_retry, RetryPolicy};
use crate::snapshots::SnapshotVault;
use crate::storage::{NewSnapshot, Storage};
use crate::types::{
    BlobEncoding, Snapshot, SnapshotId, SnapshotKind, SnapshotSubject, SubjectExport, Timestamp,
};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of one scheduled run.
#[derive(Clone, Debug, Default)]
pub struct ScheduledRun {
    pub snapshots: Vec<SnapshotId>,
    pub failed_subjects: usize,
}

/// Result of one retention sweep.
#[derive(Clone, Debug, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Creates snapshots on demand and on a timer, and sweeps expired ones.
pub struct SnapshotScheduler {
    storage: Arc<dyn Storage>,
    vault: Arc<SnapshotVault>,
    retention: Duration,
    export_timeout: Duration,
    encoding: BlobEncoding,
    /// Start of the current change window; also serves as the run lock so
    /// an overlapping tick is skipped instead of doubling work.
    last_run: Mutex<Timestamp>,
}

impl SnapshotScheduler {
    /// `window` seeds the first change window: the initial run picks up
    /// anything updated within that much time before startup.
    pub fn new(
        storage: Arc<dyn Storage>,
        vault: Arc<SnapshotVault>,
        retention: Duration,
        window: Duration,
        export_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            vault,
            retention,
            export_timeout,
            encoding: BlobEncoding::default(),
            last_run: Mutex::new(Timestamp::now().minus(window)),
        }
    }

    /// Snapshot one subject now, regardless of recent-change state.
    ///
    /// The subject tree is read in one consistent transaction and the blob
    /// is written to the vault before the metadata row exists, so a failure
    /// anywhere leaves no snapshot behind.
    pub fn create_snapshot(
        &self,
        subject: SnapshotSubject,
        kind: SnapshotKind,
    ) -> Result<Snapshot> {
        let started = Instant::now();
        let export = self.storage.export_subject(&subject)?;
        if started.elapsed() > self.export_timeout {
            return Err(CoreError::Storage(format!(
                "export of {} exceeded {:?} timeout",
                subject, self.export_timeout
            )));
        }

        let blob = self.encode(&export)?;
        let digest = self.vault.put(&blob)?;

        let created_at = Timestamp::now();
        let snapshot = self.storage.insert_snapshot(NewSnapshot {
            subject: subject.clone(),
            kind,
            digest,
            encoding: self.encoding,
            size_bytes: blob.len() as u64,
            created_at,
            expires_at: created_at.plus(self.retention),
        })?;

        info!(
            snapshot = %snapshot.id,
            subject = %subject,
            kind = ?kind,
            size = snapshot.size_bytes,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// One scheduled pass: snapshot every project that changed since the
    /// previous run. Per-subject failures are logged and skipped; they
    /// never abort the rest of the run.
    pub fn run_scheduled(&self) -> ScheduledRun {
        let mut last_run = match self.last_run.try_lock() {
            Some(guard) => guard,
            None => {
                debug!("scheduled run already in flight, skipping tick");
                return ScheduledRun::default();
            }
        };
        let since = *last_run;
        *last_run = Timestamp::now();

        let changed = match with_retry(RetryPolicy::quick(), "changed-since", || {
            self.storage.projects_changed_since(since)
        }) {
            Ok(changed) => changed,
            Err(err) => {
                error!(error = %err, "scheduled snapshot run could not list changed projects");
                return ScheduledRun {
                    snapshots: Vec::new(),
                    failed_subjects: 0,
                };
            }
        };

        let mut run = ScheduledRun::default();
        for project in changed {
            let subject = SnapshotSubject::Project(project.clone());
            match with_retry(RetryPolicy::quick(), "scheduled-snapshot", || {
                self.create_snapshot(subject.clone(), SnapshotKind::Scheduled)
            }) {
                Ok(snapshot) => run.snapshots.push(snapshot.id),
                Err(err) => {
                    error!(project = %project, error = %err, "scheduled snapshot failed");
                    run.failed_subjects += 1;
                }
            }
        }

        if !run.snapshots.is_empty() || run.failed_subjects > 0 {
            info!(
                created = run.snapshots.len(),
                failed = run.failed_subjects,
                "scheduled snapshot run finished"
            );
        }
        run
    }

    /// Delete every snapshot past its `expires_at`, blob and row, one item
    /// at a time. A failed deletion is logged and the sweep moves on.
    pub fn cleanup_expired(&self) -> CleanupReport {
        let expired = match self.storage.expired_snapshots(Timestamp::now()) {
            Ok(expired) => expired,
            Err(err) => {
                error!(error = %err, "retention sweep could not list expired snapshots");
                return CleanupReport::default();
            }
        };

        let mut report = CleanupReport::default();
        for snapshot in expired {
            let result = self
                .vault
                .delete(&snapshot.digest)
                .and_then(|_| self.storage.delete_snapshot(snapshot.id));
            match result {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(snapshot = %snapshot.id, error = %err, "failed to delete expired snapshot");
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 {
            info!(deleted = report.deleted, "cleaned up expired snapshots");
        }
        report
    }

    /// Start the background timer: every `interval`, one scheduled run and
    /// one retention sweep. The thread stops when the handle drops.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> SchedulerHandle {
        let scheduler = self;
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(interval);

        let thread = std::thread::spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    scheduler.run_scheduled();
                    scheduler.cleanup_expired();
                }
                recv(stop_rx) -> _ => break,
            }
        });

        SchedulerHandle {
            stop: stop_tx,
            thread: Some(thread),
        }
    }

    fn encode(&self, export: &SubjectExport) -> Result<Vec<u8>> {
        match self.encoding {
            BlobEncoding::Json => Ok(serde_json::to_vec(export)?),
            BlobEncoding::MessagePack => Ok(rmp_serde::to_vec(export)?),
        }
    }
}

/// Keeps the scheduler thread alive; dropping it stops the loop.
pub struct SchedulerHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the select; join is best effort.
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
