//! Shared fixtures for the migration integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use archivist_core::{Catalog, EntryId, HsmStatus, MemoryCatalog, MigrationRequest, MockBackend};
use archivist_migrate::{
    ActivityClock, CandidateSource, Capabilities, ConfigStore, MaintenanceCalendar,
    MigrateError, MigrateResult, MigrationParameters, MigrationScheduler, SelectionContext,
    WorkerPool,
};
use async_trait::async_trait;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Candidate selection over a fixed set of files.
///
/// Entries already in flight or archived are not eligible again, like a
/// policy rule matching only new or modified entries.
pub struct CatalogSource {
    files: Vec<MigrationRequest>,
    catalog: Arc<MemoryCatalog>,
    delay: Duration,
}

impl CatalogSource {
    pub fn new(files: Vec<MigrationRequest>, catalog: Arc<MemoryCatalog>) -> Self {
        let mut files = files;
        files.sort_by_key(|f| f.id);
        Self {
            files,
            catalog,
            delay: Duration::ZERO,
        }
    }

    /// Makes every batch take `delay` to select.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl CandidateSource for CatalogSource {
    async fn next_batch(
        &self,
        ctx: &SelectionContext,
        limit: usize,
    ) -> MigrateResult<Vec<MigrationRequest>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut batch = Vec::new();
        for file in &self.files {
            if batch.len() == limit {
                break;
            }
            if ctx.after.map_or(false, |after| file.id <= after) {
                continue;
            }
            let status = self
                .catalog
                .get(&file.id)
                .await
                .map_err(MigrateError::from)?
                .and_then(|attrs| attrs.status);
            if matches!(status, Some(HsmStatus::Archiving) | Some(HsmStatus::Synchro)) {
                continue;
            }
            batch.push(file.clone());
        }
        Ok(batch)
    }
}

/// Routes engine logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

pub fn id(seq: u64) -> EntryId {
    EntryId::new(seq, 0, 0)
}

/// `n` files of `size` bytes each, identifiers 1..=n.
pub fn files(n: u64, size: u64) -> Vec<MigrationRequest> {
    (1..=n)
        .map(|seq| MigrationRequest::new(id(seq), format!("/mnt/fs/dir/file{}", seq), size))
        .collect()
}

/// A scheduler wired to in-memory collaborators.
pub struct Harness {
    pub store: ConfigStore,
    pub catalog: Arc<MemoryCatalog>,
    pub backend: Arc<MockBackend>,
    pub calendar: Arc<MaintenanceCalendar>,
    pub pool: WorkerPool,
    pub scheduler: MigrationScheduler,
}

impl Harness {
    pub fn new(params: MigrationParameters, files: Vec<MigrationRequest>) -> Self {
        Self::build(params, files, ActivityClock::default(), Duration::ZERO)
    }

    pub fn build(
        params: MigrationParameters,
        files: Vec<MigrationRequest>,
        clock: ActivityClock,
        selection_delay: Duration,
    ) -> Self {
        init_tracing();
        let store = ConfigStore::new(params, Capabilities::default()).expect("valid parameters");
        let catalog = Arc::new(MemoryCatalog::new());
        let backend = Arc::new(MockBackend::new());
        let calendar = Arc::new(MaintenanceCalendar::new());
        let pool = WorkerPool::from_params(backend.clone(), catalog.clone(), store.subscribe());
        let source = Arc::new(CatalogSource::new(files, catalog.clone()).with_delay(selection_delay));
        let scheduler = MigrationScheduler::new(
            store.subscribe(),
            source,
            catalog.clone(),
            pool.handle(),
            calendar.clone(),
        )
        .with_activity_clock(clock);
        Self {
            store,
            catalog,
            backend,
            calendar,
            pool,
            scheduler,
        }
    }

    pub async fn count_status(&self, n: u64, status: HsmStatus) -> usize {
        count_status(&self.catalog, n, status).await
    }
}

/// Counts entries `1..=n` whose catalog status is `status`.
pub async fn count_status(catalog: &MemoryCatalog, n: u64, status: HsmStatus) -> usize {
    let mut count = 0;
    for seq in 1..=n {
        if catalog.status_of(&id(seq)).await == Some(status) {
            count += 1;
        }
    }
    count
}
