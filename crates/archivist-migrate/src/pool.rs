//! Fixed-size migration worker pool fed by a bounded queue.
//!
//! Workers share the receiving end of the queue. Each request is handed to
//! the backend; the resulting catalog writes are buffered per worker and
//! flushed in chunks of `db_request_limit`, whenever the queue runs empty,
//! and before the worker exits. A successful request keeps the in-flight
//! status set at dispatch; only the copy-status poller settles it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use archivist_core::{
    now_secs, AttrSet, Backend, Catalog, CatalogUpdate, HsmStatus, MigrationRequest,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::pass::PassTracker;
use crate::store::ParamWatch;

/// A queued migration request and the pass it belongs to.
#[derive(Debug, Clone)]
pub struct Job {
    /// The request.
    pub request: MigrationRequest,
    /// Tracker of the dispatching pass.
    pub tracker: Arc<PassTracker>,
}

#[derive(Debug)]
struct PoolStatsInner {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    catalog_flushes: AtomicU64,
    dropped_writes: AtomicU64,
}

impl PoolStatsInner {
    fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            catalog_flushes: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            catalog_flushes: self.catalog_flushes.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

/// Counters of a worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Requests taken from the queue.
    pub processed: u64,
    /// Requests accepted by the backend.
    pub succeeded: u64,
    /// Requests rejected by the backend.
    pub failed: u64,
    /// Batched catalog writes issued.
    pub catalog_flushes: u64,
    /// Catalog writes lost to a failed flush.
    pub dropped_writes: u64,
}

/// Sending side of the pool, cloned into every dispatcher.
#[derive(Clone)]
pub struct PoolHandle {
    sender: mpsc::Sender<Job>,
    shutdown: watch::Receiver<bool>,
}

impl PoolHandle {
    /// Queues one job, waiting while the queue is full.
    ///
    /// Fails with [`MigrateError::PoolClosed`] once the pool is shutting down.
    pub async fn submit(&self, job: Job) -> MigrateResult<()> {
        if *self.shutdown.borrow() {
            return Err(MigrateError::PoolClosed);
        }
        self.sender
            .send(job)
            .await
            .map_err(|_| MigrateError::PoolClosed)
    }

    /// Jobs currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Queue capacity.
    pub fn queue_size(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Whether the pool has been asked to stop.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

struct WorkerContext {
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: watch::Receiver<bool>,
    backend: Arc<dyn Backend>,
    catalog: Arc<dyn Catalog>,
    params: ParamWatch,
    stats: Arc<PoolStatsInner>,
}

/// The migration workers.
///
/// Worker count and queue capacity are fixed for the lifetime of the pool.
pub struct WorkerPool {
    handle: PoolHandle,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStatsInner>,
}

impl WorkerPool {
    /// Spawns `nb_threads` workers draining a queue of `queue_size` jobs.
    pub fn start(
        nb_threads: usize,
        queue_size: usize,
        backend: Arc<dyn Backend>,
        catalog: Arc<dyn Catalog>,
        params: ParamWatch,
    ) -> Self {
        let nb_threads = nb_threads.max(1);
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStatsInner::new());

        let workers = (0..nb_threads)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    worker_id,
                    receiver: Arc::clone(&receiver),
                    shutdown: shutdown_rx.clone(),
                    backend: Arc::clone(&backend),
                    catalog: Arc::clone(&catalog),
                    params: params.clone(),
                    stats: Arc::clone(&stats),
                };
                tokio::spawn(run_worker(ctx))
            })
            .collect();

        info!(nb_threads, queue_size, "migration worker pool started");
        Self {
            handle: PoolHandle {
                sender,
                shutdown: shutdown_rx,
            },
            shutdown_tx,
            workers,
            stats,
        }
    }

    /// Starts a pool sized by the current parameter snapshot.
    pub fn from_params(backend: Arc<dyn Backend>, catalog: Arc<dyn Catalog>, params: ParamWatch) -> Self {
        let (nb_threads, queue_size) = {
            let snapshot = params.borrow();
            (snapshot.params.nb_threads, snapshot.params.queue_size)
        };
        Self::start(nb_threads, queue_size, backend, catalog, params)
    }

    /// A handle for submitting jobs.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Live counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Stops accepting jobs, lets the workers drain the queue and waits for them.
    ///
    /// A job whose submission succeeded is always processed; producers still
    /// blocked on a full queue get [`MigrateError::PoolClosed`].
    pub async fn shutdown(self) -> PoolStats {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("migration worker panicked: {}", e);
            }
        }
        let stats = self.stats.snapshot();
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "migration worker pool stopped"
        );
        stats
    }
}

async fn run_worker(mut ctx: WorkerContext) {
    let mut pending: Vec<CatalogUpdate> = Vec::new();
    debug!(worker = ctx.worker_id, "migration worker started");

    loop {
        let next = {
            let mut receiver = ctx.receiver.lock().await;
            match receiver.try_recv() {
                Ok(job) => Some(job),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };

        let job = match next {
            Some(job) => job,
            None => {
                flush(&ctx, &mut pending).await;
                if *ctx.shutdown.borrow_and_update() {
                    break;
                }
                let mut receiver = ctx.receiver.lock().await;
                tokio::select! {
                    job = receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        migrate_one(&ctx, job, &mut pending).await;

        flush_if_full(&ctx, &mut pending).await;
    }

    // Close the queue so blocked producers fail, then take what was accepted.
    loop {
        let job = {
            let mut receiver = ctx.receiver.lock().await;
            receiver.close();
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };
        migrate_one(&ctx, job, &mut pending).await;
        flush_if_full(&ctx, &mut pending).await;
    }

    flush(&ctx, &mut pending).await;
    debug!(worker = ctx.worker_id, "migration worker stopped");
}

async fn flush_if_full(ctx: &WorkerContext, pending: &mut Vec<CatalogUpdate>) {
    let limit = ctx.params.borrow().params.db_request_limit;
    if limit > 0 && pending.len() >= limit {
        flush(ctx, pending).await;
    }
}

async fn migrate_one(ctx: &WorkerContext, job: Job, pending: &mut Vec<CatalogUpdate>) {
    let Job { request, tracker } = job;
    ctx.stats.processed.fetch_add(1, Ordering::Relaxed);

    match ctx.backend.migrate(&request).await {
        Ok(receipt) => {
            debug!(
                worker = ctx.worker_id,
                pass = tracker.pass_id(),
                id = %request.id,
                backend_path = %receipt.backend_path,
                "archive request accepted"
            );
            ctx.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            pending.push(CatalogUpdate {
                id: request.id,
                attrs: AttrSet {
                    backend_path: Some(receipt.backend_path),
                    size: Some(request.size),
                    last_archive: Some(now_secs()),
                    ..AttrSet::default()
                },
            });
            tracker.record_outcome(true);
        }
        Err(e) => {
            warn!(
                worker = ctx.worker_id,
                pass = tracker.pass_id(),
                id = %request.id,
                path = %request.path,
                "archive request failed: {}",
                e
            );
            ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
            pending.push(CatalogUpdate {
                id: request.id,
                attrs: AttrSet {
                    status: Some(HsmStatus::ArchiveFailed),
                    ..AttrSet::default()
                },
            });
            tracker.record_outcome(false);
        }
    }
}

async fn flush(ctx: &WorkerContext, pending: &mut Vec<CatalogUpdate>) {
    if pending.is_empty() {
        return;
    }
    let limit = ctx.params.borrow().params.db_request_limit;
    let chunk_len = if limit == 0 { pending.len() } else { limit };
    let updates = std::mem::take(pending);

    for chunk in updates.chunks(chunk_len) {
        ctx.stats.catalog_flushes.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = ctx.catalog.apply_updates(chunk).await {
            error!(
                worker = ctx.worker_id,
                count = chunk.len(),
                "failed to record migration results: {}",
                e
            );
            ctx.stats
                .dropped_writes
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
    }
}
