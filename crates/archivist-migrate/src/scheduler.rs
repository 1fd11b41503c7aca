//! The migration scheduler.
//!
//! One pass per `runtime_interval`: check the maintenance calendar, pull
//! candidates from the external selection in batches, charge them against the
//! pass caps, mark the accepted ones in flight and hand them to the worker
//! pool, then wait until every request reported back or the pass went idle
//! for longer than `migration_timeout`. A timed-out pass is abandoned; its
//! outstanding requests stay in flight for the copy-status poller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use archivist_core::{now_ms, now_secs, Catalog, EntryId, MigrationRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::MigrateResult;
use crate::maintenance::{MaintenanceCalendar, Pacing};
use crate::pass::{ActivityClock, MigrationPass, WaitOutcome};
use crate::pool::{Job, PoolHandle};
use crate::store::ParamWatch;

/// What the candidate selection knows about the pass it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionContext {
    /// Pass identifier.
    pub pass_id: u64,
    /// Last candidate returned so far in this pass; the next batch starts
    /// strictly after it.
    pub after: Option<EntryId>,
    /// Requests left before the count cap, `None` when unbounded.
    pub remaining_count: Option<u64>,
    /// Bytes left before the volume cap, `None` when unbounded.
    pub remaining_volume: Option<u64>,
    /// Time left before the next maintenance, in pre-maintenance mode.
    pub pre_maintenance: Option<Duration>,
    /// Whether never-archived entries are eligible, when the backend
    /// supports the choice.
    pub backup_new_files: Option<bool>,
}

/// External candidate selection.
///
/// Returns at most `limit` candidates (0 means no limit) in a stable order,
/// resuming after `ctx.after`. An empty batch ends the selection for the pass.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Fetches the next batch of candidates.
    async fn next_batch(
        &self,
        ctx: &SelectionContext,
        limit: usize,
    ) -> MigrateResult<Vec<MigrationRequest>>;
}

/// Scheduler life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Between passes.
    Idle,
    /// Pulling candidates.
    SelectingCandidates,
    /// Marking and enqueueing accepted candidates.
    Dispatching,
    /// Waiting for the workers to report.
    AwaitingCompletion,
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassOutcome {
    /// Every dispatched request reported back.
    Completed,
    /// Abandoned after `migration_timeout` without activity.
    TimedOut,
    /// Skipped: maintenance is too close or running.
    Deferred {
        /// Time left before the maintenance starts.
        remaining: Duration,
    },
    /// Nothing to dispatch.
    Idle,
}

/// Summary of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Pass identifier.
    pub pass_id: u64,
    /// How the pass ended.
    pub outcome: PassOutcome,
    /// Requests dispatched.
    pub dispatched: u64,
    /// Bytes dispatched.
    pub dispatched_volume: u64,
    /// Requests reported successful before the pass ended.
    pub succeeded: u64,
    /// Requests reported failed before the pass ended.
    pub failed: u64,
    /// Candidates deferred to a later pass by the caps.
    pub deferred: u64,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl PassReport {
    fn skipped(pass_id: u64, outcome: PassOutcome) -> Self {
        Self {
            pass_id,
            outcome,
            dispatched: 0,
            dispatched_volume: 0,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Runs migration passes.
pub struct MigrationScheduler {
    params: ParamWatch,
    source: Arc<dyn CandidateSource>,
    catalog: Arc<dyn Catalog>,
    pool: PoolHandle,
    calendar: Arc<MaintenanceCalendar>,
    clock: ActivityClock,
    state: RwLock<SchedulerState>,
    next_pass_id: AtomicU64,
}

impl MigrationScheduler {
    /// Creates a scheduler with the default activity clock.
    pub fn new(
        params: ParamWatch,
        source: Arc<dyn CandidateSource>,
        catalog: Arc<dyn Catalog>,
        pool: PoolHandle,
        calendar: Arc<MaintenanceCalendar>,
    ) -> Self {
        Self {
            params,
            source,
            catalog,
            pool,
            calendar,
            clock: ActivityClock::default(),
            state: RwLock::new(SchedulerState::Idle),
            next_pass_id: AtomicU64::new(1),
        }
    }

    /// Selects which events reset the pass inactivity clock.
    pub fn with_activity_clock(mut self, clock: ActivityClock) -> Self {
        self.clock = clock;
        self
    }

    /// Current life-cycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Runs one pass against the current parameter snapshot.
    pub async fn run_pass(&self) -> MigrateResult<PassReport> {
        let result = self.pass_inner().await;
        self.set_state(SchedulerState::Idle);
        result
    }

    async fn pass_inner(&self) -> MigrateResult<PassReport> {
        let snapshot = self.params.borrow().clone();
        let params = &snapshot.params;
        let pass_id = self.next_pass_id.fetch_add(1, Ordering::Relaxed);

        let pre_maintenance = match self.calendar.pacing(now_ms(), params) {
            Pacing::Defer { remaining } => {
                info!(
                    pass = pass_id,
                    remaining_secs = remaining.as_secs(),
                    "maintenance too close, no migration this cycle"
                );
                return Ok(PassReport::skipped(pass_id, PassOutcome::Deferred { remaining }));
            }
            Pacing::PreMaintenance { remaining } => {
                info!(
                    pass = pass_id,
                    remaining_secs = remaining.as_secs(),
                    "pre-maintenance mode"
                );
                Some(remaining)
            }
            Pacing::Normal => None,
        };

        let mut pass = MigrationPass::new(pass_id, params, self.clock, pre_maintenance);
        let tracker = pass.tracker();
        let mut after = None;

        debug!(pass = pass_id, version = snapshot.version, "migration pass started");
        loop {
            if pass.caps_exhausted() {
                debug!(pass = pass_id, "pass caps reached");
                break;
            }
            self.set_state(SchedulerState::SelectingCandidates);
            let ctx = SelectionContext {
                pass_id,
                after,
                remaining_count: pass.remaining_count(),
                remaining_volume: pass.remaining_volume(),
                pre_maintenance,
                backup_new_files: params.backup_new_files,
            };
            let batch = match self.source.next_batch(&ctx, params.db_request_limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(pass = pass_id, "candidate selection failed: {}", e);
                    break;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);

            let accepted: Vec<MigrationRequest> =
                batch.into_iter().filter(|r| pass.try_charge(r.size)).collect();
            if accepted.is_empty() {
                continue;
            }

            self.set_state(SchedulerState::Dispatching);
            let ids: Vec<EntryId> = accepted.iter().map(|r| r.id).collect();
            if let Err(e) = self.catalog.mark_in_flight(&ids, now_secs()).await {
                error!(
                    pass = pass_id,
                    count = ids.len(),
                    "cannot mark candidates in flight, stopping dispatch: {}",
                    e
                );
                for request in &accepted {
                    pass.release(request.size);
                }
                break;
            }
            for request in accepted {
                tracker.record_dispatch();
                let job = Job {
                    request,
                    tracker: Arc::clone(&tracker),
                };
                if let Err(e) = self.pool.submit(job).await {
                    tracker.cancel_dispatch();
                    return Err(e);
                }
            }
        }

        if pass.dispatched_count() == 0 {
            debug!(pass = pass_id, deferred = pass.deferred(), "nothing to migrate");
            return Ok(PassReport {
                deferred: pass.deferred(),
                elapsed: pass.elapsed(),
                ..PassReport::skipped(pass_id, PassOutcome::Idle)
            });
        }

        self.set_state(SchedulerState::AwaitingCompletion);
        let outcome = match tracker.wait(params.migration_timeout).await {
            WaitOutcome::AllReported => PassOutcome::Completed,
            WaitOutcome::TimedOut => {
                warn!(
                    pass = pass_id,
                    outstanding = tracker.outstanding(),
                    timeout_secs = params.migration_timeout.as_secs(),
                    "migration pass idle for too long, abandoning it"
                );
                PassOutcome::TimedOut
            }
        };

        let report = PassReport {
            pass_id,
            outcome,
            dispatched: pass.dispatched_count(),
            dispatched_volume: pass.dispatched_volume(),
            succeeded: tracker.succeeded(),
            failed: tracker.failed(),
            deferred: pass.deferred(),
            elapsed: pass.elapsed(),
        };
        info!(
            pass = pass_id,
            dispatched = report.dispatched,
            volume = report.dispatched_volume,
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            "migration pass finished: {:?}",
            report.outcome
        );
        Ok(report)
    }

    /// Runs passes every `runtime_interval` until `shutdown` turns true.
    ///
    /// A running pass is never interrupted; shutdown is honored between passes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("migration scheduler started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if let Err(e) = self.run_pass().await {
                error!("migration pass failed: {}", e);
            }
            let interval = self.params.borrow().params.runtime_interval;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("migration scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::maintenance::MaintenanceWindow;
    use crate::params::{Capabilities, MigrationParameters};
    use crate::pool::WorkerPool;
    use crate::store::ConfigStore;
    use archivist_core::{HsmStatus, MemoryCatalog, MockBackend};

    struct ListSource {
        candidates: Vec<MigrationRequest>,
    }

    #[async_trait]
    impl CandidateSource for ListSource {
        async fn next_batch(
            &self,
            ctx: &SelectionContext,
            limit: usize,
        ) -> MigrateResult<Vec<MigrationRequest>> {
            let limit = if limit == 0 { usize::MAX } else { limit };
            Ok(self
                .candidates
                .iter()
                .filter(|c| ctx.after.map_or(true, |after| c.id > after))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl CandidateSource for BrokenSource {
        async fn next_batch(&self, _: &SelectionContext, _: usize) -> MigrateResult<Vec<MigrationRequest>> {
            Err(MigrateError::Selection("rule engine offline".into()))
        }
    }

    fn candidates(n: u64, size: u64) -> Vec<MigrationRequest> {
        (1..=n)
            .map(|seq| MigrationRequest::new(EntryId::new(seq, 0, 0), format!("/fs/{}", seq), size))
            .collect()
    }

    struct Fixture {
        scheduler: MigrationScheduler,
        pool: WorkerPool,
        catalog: Arc<MemoryCatalog>,
        calendar: Arc<MaintenanceCalendar>,
        _store: ConfigStore,
    }

    fn fixture(params: MigrationParameters, source: Arc<dyn CandidateSource>) -> Fixture {
        let store = ConfigStore::new(params, Capabilities::default()).unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let backend = Arc::new(MockBackend::new());
        let pool = WorkerPool::from_params(backend, catalog.clone(), store.subscribe());
        let calendar = Arc::new(MaintenanceCalendar::new());
        let scheduler = MigrationScheduler::new(
            store.subscribe(),
            source,
            catalog.clone(),
            pool.handle(),
            calendar.clone(),
        );
        Fixture {
            scheduler,
            pool,
            catalog,
            calendar,
            _store: store,
        }
    }

    #[tokio::test]
    async fn test_pass_dispatches_in_batches() {
        let params = MigrationParameters {
            db_request_limit: 3,
            ..MigrationParameters::default()
        };
        let f = fixture(params, Arc::new(ListSource { candidates: candidates(10, 5) }));
        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.dispatched, 10);
        assert_eq!(report.dispatched_volume, 50);
        assert_eq!(report.succeeded, 10);
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
        f.pool.shutdown().await;
        assert_eq!(
            f.catalog.status_of(&EntryId::new(7, 0, 0)).await,
            Some(HsmStatus::Archiving)
        );
    }

    #[tokio::test]
    async fn test_caps_defer_the_rest() {
        let params = MigrationParameters {
            max_count: 4,
            db_request_limit: 3,
            ..MigrationParameters::default()
        };
        let f = fixture(params, Arc::new(ListSource { candidates: candidates(10, 5) }));
        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.dispatched, 4);
        assert_eq!(report.deferred, 2);
        f.pool.shutdown().await;
        assert_eq!(f.catalog.status_of(&EntryId::new(5, 0, 0)).await, None);
    }

    #[tokio::test]
    async fn test_empty_selection_is_idle() {
        let f = fixture(MigrationParameters::default(), Arc::new(ListSource { candidates: vec![] }));
        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Idle);
        f.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_selection_failure_ends_the_pass() {
        let f = fixture(MigrationParameters::default(), Arc::new(BrokenSource));
        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Idle);
        f.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unmarked_batch_is_not_counted_as_dispatched() {
        let params = MigrationParameters {
            db_request_limit: 3,
            ..MigrationParameters::default()
        };
        let f = fixture(params, Arc::new(ListSource { candidates: candidates(10, 5) }));
        f.catalog.fail_writes_for(EntryId::new(1, 0, 0)).await;

        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Idle);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.dispatched_volume, 0);
        assert_eq!(report.deferred, 3);
        let stats = f.pool.shutdown().await;
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_unmarked_later_batch_keeps_earlier_dispatches() {
        let params = MigrationParameters {
            db_request_limit: 3,
            ..MigrationParameters::default()
        };
        let f = fixture(params, Arc::new(ListSource { candidates: candidates(10, 5) }));
        f.catalog.fail_writes_for(EntryId::new(5, 0, 0)).await;

        let report = f.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.dispatched_volume, 15);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.deferred, 3);
        let stats = f.pool.shutdown().await;
        assert_eq!(stats.processed, 3);
    }

    #[tokio::test]
    async fn test_close_maintenance_defers_the_pass() {
        let f = fixture(MigrationParameters::default(), Arc::new(ListSource { candidates: candidates(3, 1) }));
        let now = now_ms();
        f.calendar
            .schedule(
                MaintenanceWindow {
                    start_ms: now + 10 * 60 * 1000,
                    end_ms: now + 70 * 60 * 1000,
                    reason: "backend upgrade".into(),
                },
                now,
            )
            .unwrap();
        let report = f.scheduler.run_pass().await.unwrap();
        assert!(matches!(report.outcome, PassOutcome::Deferred { .. }));
        assert_eq!(report.dispatched, 0);
        f.pool.shutdown().await;
        assert_eq!(f.catalog.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_fails_the_pass() {
        let f = fixture(MigrationParameters::default(), Arc::new(ListSource { candidates: candidates(2, 1) }));
        f.pool.shutdown().await;
        let result = f.scheduler.run_pass().await;
        assert!(matches!(result, Err(MigrateError::PoolClosed)));
        assert_eq!(f.scheduler.state(), SchedulerState::Idle);
    }
}
