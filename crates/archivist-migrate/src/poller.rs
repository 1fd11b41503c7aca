//! Copy-status poller.
//!
//! Reconciles entries left in flight by the scheduler with the backend: a
//! confirmed copy becomes `Synchro`, a failed one `ArchiveFailed`. Entries
//! still being copied are left for the next cycle.

use std::sync::Arc;

use archivist_core::{AttrSet, Backend, Catalog, CatalogUpdate, CopyStatus, HsmStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::MigrateResult;
use crate::store::ParamWatch;

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// In-flight entries examined.
    pub checked: u64,
    /// Entries whose copy the backend confirmed.
    pub confirmed: u64,
    /// Entries whose copy the backend reported failed.
    pub failed: u64,
    /// Entries still being copied.
    pub in_flight: u64,
    /// Entries the backend could not be asked about.
    pub errors: u64,
}

/// Periodic reconciliation of in-flight archive requests.
pub struct CopyStatusPoller {
    params: ParamWatch,
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn Backend>,
}

impl CopyStatusPoller {
    /// Creates a poller.
    pub fn new(params: ParamWatch, catalog: Arc<dyn Catalog>, backend: Arc<dyn Backend>) -> Self {
        Self {
            params,
            catalog,
            backend,
        }
    }

    /// Runs one reconciliation cycle over every in-flight entry.
    pub async fn run_cycle(&self) -> MigrateResult<PollReport> {
        let page_size = self.params.borrow().params.db_request_limit;
        let mut report = PollReport::default();
        let mut after = None;

        loop {
            let page = self.catalog.list_outstanding(after, page_size).await?;
            let Some((last, _)) = page.last() else {
                break;
            };
            after = Some(*last);

            let mut updates = Vec::new();
            for (id, attrs) in &page {
                report.checked += 1;
                let status = match self.backend.copy_status(id, attrs).await {
                    Ok(CopyStatus::InProgress) => {
                        report.in_flight += 1;
                        continue;
                    }
                    Ok(CopyStatus::Done) => {
                        report.confirmed += 1;
                        HsmStatus::Synchro
                    }
                    Ok(CopyStatus::Failed) => {
                        warn!(id = %id, "backend reports archive copy failed");
                        report.failed += 1;
                        HsmStatus::ArchiveFailed
                    }
                    Err(e) => {
                        warn!(id = %id, "cannot get copy status: {}", e);
                        report.errors += 1;
                        continue;
                    }
                };
                updates.push(CatalogUpdate {
                    id: *id,
                    attrs: AttrSet {
                        status: Some(status),
                        ..AttrSet::default()
                    },
                });
            }

            if !updates.is_empty() {
                self.catalog.apply_updates(&updates).await?;
            }
            if page_size == 0 {
                break;
            }
        }

        debug!(
            checked = report.checked,
            confirmed = report.confirmed,
            failed = report.failed,
            in_flight = report.in_flight,
            errors = report.errors,
            "copy status cycle done"
        );
        Ok(report)
    }

    /// Polls every `check_copy_status_delay` until `shutdown` turns true.
    ///
    /// The first cycle runs immediately only when `check_copy_status_on_startup`
    /// is set; otherwise the loop starts with a full delay.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("copy status poller started");
        let mut poll_now = self.params.borrow().params.check_copy_status_on_startup;
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if poll_now {
                if let Err(e) = self.run_cycle().await {
                    error!("copy status cycle failed: {}", e);
                }
            }
            poll_now = true;
            let delay = self.params.borrow().params.check_copy_status_delay;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("copy status poller stopped");
    }
}
