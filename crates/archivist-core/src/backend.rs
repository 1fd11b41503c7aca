//! Backend collaborator: the archival/HSM storage target.
//!
//! Wire-level details belong to the backend implementation. [`MockBackend`]
//! is an in-process implementation with scriptable outcomes and latency.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::types::{AttrSet, EntryId, MigrationRequest, RecoveryOutcome};

/// Acknowledgement of an accepted archive request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateReceipt {
    /// Where the copy is being written in the backend.
    pub backend_path: String,
}

/// Progress of an archive copy as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    /// Copy still running.
    InProgress,
    /// Copy complete.
    Done,
    /// Copy failed.
    Failed,
}

/// Reply to a recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverReply {
    /// Recovery outcome.
    pub outcome: RecoveryOutcome,
    /// Identifier of the restored entry, possibly different from the original.
    pub new_id: EntryId,
    /// Attributes of the restored entry.
    pub new_attrs: AttrSet,
}

/// Operations the engine consumes from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Issues an archive request for one entry.
    async fn migrate(&self, request: &MigrationRequest) -> BackendResult<MigrateReceipt>;

    /// Queries the progress of an outstanding archive copy.
    async fn copy_status(&self, id: &EntryId, attrs: &AttrSet) -> BackendResult<CopyStatus>;

    /// Restores a removed entry from its archived copy.
    async fn recover(&self, id: &EntryId, target: &AttrSet) -> BackendResult<RecoverReply>;
}

/// Call counters of a [`MockBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockBackendStats {
    /// `migrate` calls.
    pub migrate_calls: u64,
    /// `copy_status` calls.
    pub status_calls: u64,
    /// `recover` calls.
    pub recover_calls: u64,
    /// Highest number of concurrent `migrate` calls observed.
    pub peak_concurrent_migrations: usize,
}

#[derive(Default)]
struct Script {
    migrate_delay: Duration,
    failing_migrations: HashSet<EntryId>,
    copy_status: HashMap<EntryId, CopyStatus>,
    status_errors: HashSet<EntryId>,
    recoveries: HashMap<EntryId, RecoverReply>,
    recover_errors: HashSet<EntryId>,
    migrated: Vec<EntryId>,
}

/// Scriptable in-memory backend.
///
/// By default migrations succeed immediately, copies report `InProgress`, and
/// recoveries succeed under the original identifier with the target attributes.
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    migrate_calls: AtomicU64,
    status_calls: AtomicU64,
    recover_calls: AtomicU64,
    in_progress: AtomicUsize,
    peak: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every `migrate` call take `delay` before answering.
    pub fn set_migrate_delay(&self, delay: Duration) {
        self.script().migrate_delay = delay;
    }

    /// Makes `migrate` fail for `id`.
    pub fn fail_migration(&self, id: EntryId) {
        self.script().failing_migrations.insert(id);
    }

    /// Sets the copy status reported for `id`.
    pub fn set_copy_status(&self, id: EntryId, status: CopyStatus) {
        self.script().copy_status.insert(id, status);
    }

    /// Makes `copy_status` fail for `id`.
    pub fn fail_copy_status(&self, id: EntryId) {
        self.script().status_errors.insert(id);
    }

    /// Sets the reply returned when `id` is recovered.
    pub fn script_recovery(&self, id: EntryId, reply: RecoverReply) {
        self.script().recoveries.insert(id, reply);
    }

    /// Makes `recover` fail with a transport error for `id`.
    pub fn fail_recovery(&self, id: EntryId) {
        self.script().recover_errors.insert(id);
    }

    /// Identifiers accepted by `migrate`, in completion order.
    pub fn migrated(&self) -> Vec<EntryId> {
        self.script().migrated.clone()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockBackendStats {
        MockBackendStats {
            migrate_calls: self.migrate_calls.load(Ordering::Relaxed),
            status_calls: self.status_calls.load(Ordering::Relaxed),
            recover_calls: self.recover_calls.load(Ordering::Relaxed),
            peak_concurrent_migrations: self.peak.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn migrate(&self, request: &MigrationRequest) -> BackendResult<MigrateReceipt> {
        self.migrate_calls.fetch_add(1, Ordering::Relaxed);
        let running = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let (delay, fails) = {
            let script = self.script();
            (
                script.migrate_delay,
                script.failing_migrations.contains(&request.id),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_progress.fetch_sub(1, Ordering::SeqCst);

        if fails {
            debug!(id = %request.id, "mock backend: migrate failed");
            return Err(BackendError::Transient {
                id: request.id,
                reason: "scripted failure".to_string(),
            });
        }

        self.script().migrated.push(request.id);
        let backend_path = request
            .backend_path
            .clone()
            .unwrap_or_else(|| format!("archive/{:x}/{:x}", request.id.seq, request.id.oid));
        Ok(MigrateReceipt { backend_path })
    }

    async fn copy_status(&self, id: &EntryId, _attrs: &AttrSet) -> BackendResult<CopyStatus> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        let script = self.script();
        if script.status_errors.contains(id) {
            return Err(BackendError::Transient {
                id: *id,
                reason: "status query failed".to_string(),
            });
        }
        Ok(script
            .copy_status
            .get(id)
            .copied()
            .unwrap_or(CopyStatus::InProgress))
    }

    async fn recover(&self, id: &EntryId, target: &AttrSet) -> BackendResult<RecoverReply> {
        self.recover_calls.fetch_add(1, Ordering::Relaxed);
        let script = self.script();
        if script.recover_errors.contains(id) {
            return Err(BackendError::Unavailable(format!("cannot reach backend for {}", id)));
        }
        Ok(script.recoveries.get(id).cloned().unwrap_or_else(|| RecoverReply {
            outcome: RecoveryOutcome::Recovered,
            new_id: *id,
            new_attrs: target.clone(),
        }))
    }
}
