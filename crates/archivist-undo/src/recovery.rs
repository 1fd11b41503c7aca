//! Restoration of soft-deleted entries.
//!
//! For each selected entry the backend restores the data at its last known
//! path. On success the journal record is discarded and the entry is written
//! back to the catalog under the identifier the backend returned: insert,
//! or update when a record with that identifier already exists. The journal
//! record is only removed after the backend succeeded, so a retry is always
//! possible.

use std::sync::Arc;

use archivist_core::{Backend, Catalog, EntryId, RecoveryOutcome, RemovedEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{UndoError, UndoResult};
use crate::filter::RemovedFilter;
use crate::journal::SoftDeleteJournal;

/// How the restored entry was written to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Upsert {
    /// A new record was created.
    Inserted,
    /// A record with that identifier existed and was updated.
    Updated,
}

/// Result of the recovery of one removed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryRecovery {
    /// Restored and recorded in the catalog.
    Restored {
        /// Identifier in the journal.
        old_id: EntryId,
        /// Identifier after restoration.
        new_id: EntryId,
        /// `Recovered` or `PartiallyRecovered`.
        outcome: RecoveryOutcome,
        /// How the catalog was updated.
        upsert: Upsert,
    },
    /// Not attempted: the last known path is unknown.
    Skipped {
        /// Identifier in the journal.
        id: EntryId,
        /// Backend copy, for manual recovery.
        backend_path: Option<String>,
    },
    /// Attempted and failed.
    Failed {
        /// Identifier in the journal.
        id: EntryId,
        /// What went wrong.
        reason: String,
    },
}

/// Per-entry results of a recovery run: skipped entries first, then the
/// attempted ones in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// One result per selected entry.
    pub entries: Vec<EntryRecovery>,
}

impl RecoveryReport {
    /// Entries restored.
    pub fn restored(&self) -> usize {
        self.count(|e| matches!(e, EntryRecovery::Restored { .. }))
    }

    /// Entries skipped for lack of a path.
    pub fn skipped(&self) -> usize {
        self.count(|e| matches!(e, EntryRecovery::Skipped { .. }))
    }

    /// Entries that could not be restored.
    pub fn failed(&self) -> usize {
        self.count(|e| matches!(e, EntryRecovery::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&EntryRecovery) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(e)).count()
    }
}

/// Restores removed entries from the backend.
pub struct RecoveryEngine {
    journal: SoftDeleteJournal,
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn Backend>,
}

impl RecoveryEngine {
    /// Creates an engine over `catalog` and `backend`, listing the journal in
    /// pages of `page_size` entries.
    pub fn new(catalog: Arc<dyn Catalog>, backend: Arc<dyn Backend>, page_size: usize) -> Self {
        Self {
            journal: SoftDeleteJournal::new(Arc::clone(&catalog), page_size),
            catalog,
            backend,
        }
    }

    /// The journal the engine works on.
    pub fn journal(&self) -> &SoftDeleteJournal {
        &self.journal
    }

    /// Restores every entry selected by `filter`.
    ///
    /// Only a failure to list the journal is an error; each entry's own
    /// failure is reported and the run continues.
    pub async fn recover(&self, filter: &RemovedFilter) -> UndoResult<RecoveryReport> {
        let entries = self.journal.collect(filter).await?;
        let mut report = RecoveryReport::default();

        let (eligible, unknown): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| !e.path_unknown());
        for entry in unknown {
            warn!(
                id = %entry.id,
                backend_path = entry.backend_path.as_deref().unwrap_or(""),
                "last filesystem path is not known, entry skipped"
            );
            report.entries.push(EntryRecovery::Skipped {
                id: entry.id,
                backend_path: entry.backend_path,
            });
        }

        for entry in &eligible {
            report.entries.push(self.recover_entry(entry).await);
        }

        info!(
            filter = %filter,
            restored = report.restored(),
            skipped = report.skipped(),
            failed = report.failed(),
            "recovery done"
        );
        Ok(report)
    }

    /// Restores one entry. Safe to call again for an entry already restored.
    pub async fn recover_entry(&self, entry: &RemovedEntry) -> EntryRecovery {
        if entry.path_unknown() {
            return EntryRecovery::Skipped {
                id: entry.id,
                backend_path: entry.backend_path.clone(),
            };
        }

        info!(id = %entry.id, path = %entry.last_known_path, "restoring entry");
        let reply = match self.backend.recover(&entry.id, &entry.restore_target()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(id = %entry.id, path = %entry.last_known_path, "recovery failed: {}", e);
                return EntryRecovery::Failed {
                    id: entry.id,
                    reason: e.to_string(),
                };
            }
        };

        match reply.outcome {
            RecoveryOutcome::Failed => {
                error!(id = %entry.id, path = %entry.last_known_path, "backend could not restore entry");
                return EntryRecovery::Failed {
                    id: entry.id,
                    reason: "backend could not restore entry".to_string(),
                };
            }
            RecoveryOutcome::PartiallyRecovered => {
                warn!(id = %entry.id, path = %entry.last_known_path, "entry partially restored");
            }
            RecoveryOutcome::Recovered => {}
        }

        match self.journal.discard(&entry.id).await {
            Ok(()) => {}
            Err(UndoError::NotFound(id)) => {
                debug!(id = %id, "journal record already discarded");
            }
            Err(e) => {
                error!(id = %entry.id, "could not remove previous id from the journal: {}", e);
            }
        }

        let upsert = match self.catalog.insert(&reply.new_id, &reply.new_attrs).await {
            Ok(()) => Upsert::Inserted,
            Err(e) if e.is_conflict() => {
                match self.catalog.update(&reply.new_id, &reply.new_attrs).await {
                    Ok(()) => Upsert::Updated,
                    Err(e) => return self.catalog_failure(entry, e.to_string()),
                }
            }
            Err(e) => return self.catalog_failure(entry, e.to_string()),
        };

        debug!(old_id = %entry.id, new_id = %reply.new_id, ?upsert, "entry recorded in catalog");
        EntryRecovery::Restored {
            old_id: entry.id,
            new_id: reply.new_id,
            outcome: reply.outcome,
            upsert,
        }
    }

    fn catalog_failure(&self, entry: &RemovedEntry, reason: String) -> EntryRecovery {
        error!(id = %entry.id, "error recording restored entry in the catalog: {}", reason);
        EntryRecovery::Failed {
            id: entry.id,
            reason,
        }
    }
}
