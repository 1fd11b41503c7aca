//! Bookkeeping of one scheduling pass: cap charging and the inactivity clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::params::MigrationParameters;

/// Horizon for deadlines past the range of the clock, as tokio clamps sleeps.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Which events reset the pass inactivity clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivityClock {
    /// Dispatches, completions and failures all count as activity.
    #[default]
    DispatchAndCompletion,
    /// Only completions and failures count as activity.
    CompletionOnly,
}

/// How waiting for a pass to finish ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every dispatched request reported back.
    AllReported,
    /// No activity for longer than the migration timeout.
    TimedOut,
}

/// Activity tracker shared between a pass and the workers serving it.
#[derive(Debug)]
pub struct PassTracker {
    pass_id: u64,
    clock: ActivityClock,
    outstanding: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    last_activity: Mutex<Instant>,
    notify: Notify,
}

impl PassTracker {
    /// Creates a tracker whose clock starts now.
    pub fn new(pass_id: u64, clock: ActivityClock) -> Self {
        Self {
            pass_id,
            clock,
            outstanding: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            notify: Notify::new(),
        }
    }

    /// Identifier of the pass.
    pub fn pass_id(&self) -> u64 {
        self.pass_id
    }

    fn touch(&self) {
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    /// Time of the last recorded activity.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records that a request was handed to the worker pool.
    pub fn record_dispatch(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.clock == ActivityClock::DispatchAndCompletion {
            self.touch();
        }
    }

    /// Withdraws a dispatch that never reached the worker pool.
    pub fn cancel_dispatch(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Records a completion (`ok`) or failure reported by a worker.
    pub fn record_outcome(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.touch();
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Requests dispatched and not yet reported.
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Requests reported successful.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Requests reported failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Waits until every dispatched request reported back, or until
    /// `timeout` elapsed since the last activity.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        loop {
            if self.outstanding() == 0 {
                return WaitOutcome::AllReported;
            }
            let deadline = deadline_after(self.last_activity(), timeout);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if self.outstanding() == 0 {
                        return WaitOutcome::AllReported;
                    }
                    if deadline_after(self.last_activity(), timeout) <= Instant::now() {
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
    }
}

/// One scheduling cycle: caps, cumulative charges and the shared tracker.
#[derive(Debug)]
pub struct MigrationPass {
    started_at: Instant,
    max_count: u64,
    max_volume: u64,
    dispatched_count: u64,
    dispatched_volume: u64,
    deferred: u64,
    maintenance_deadline: Option<Duration>,
    tracker: Arc<PassTracker>,
}

impl MigrationPass {
    /// Starts a pass with the caps of `params`.
    pub fn new(
        pass_id: u64,
        params: &MigrationParameters,
        clock: ActivityClock,
        maintenance_deadline: Option<Duration>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            max_count: params.max_count,
            max_volume: params.max_volume,
            dispatched_count: 0,
            dispatched_volume: 0,
            deferred: 0,
            maintenance_deadline,
            tracker: Arc::new(PassTracker::new(pass_id, clock)),
        }
    }

    /// Tracker handed to the workers along with each request.
    pub fn tracker(&self) -> Arc<PassTracker> {
        Arc::clone(&self.tracker)
    }

    /// Charges one request of `size` bytes against the caps.
    ///
    /// Returns `false`, without charging, when either cap would be exceeded;
    /// the request is then deferred to a later pass.
    pub fn try_charge(&mut self, size: u64) -> bool {
        if self.max_count > 0 && self.dispatched_count + 1 > self.max_count {
            self.deferred += 1;
            return false;
        }
        if self.max_volume > 0 && self.dispatched_volume.saturating_add(size) > self.max_volume {
            self.deferred += 1;
            return false;
        }
        self.dispatched_count += 1;
        self.dispatched_volume = self.dispatched_volume.saturating_add(size);
        true
    }

    /// Takes back the charge of a request that could not be dispatched; it
    /// counts as deferred instead.
    pub fn release(&mut self, size: u64) {
        self.dispatched_count = self.dispatched_count.saturating_sub(1);
        self.dispatched_volume = self.dispatched_volume.saturating_sub(size);
        self.deferred += 1;
    }

    /// Whether no further request can be charged.
    pub fn caps_exhausted(&self) -> bool {
        (self.max_count > 0 && self.dispatched_count >= self.max_count)
            || (self.max_volume > 0 && self.dispatched_volume >= self.max_volume)
    }

    /// Requests left before the count cap, `None` when unbounded.
    pub fn remaining_count(&self) -> Option<u64> {
        (self.max_count > 0).then(|| self.max_count - self.dispatched_count)
    }

    /// Bytes left before the volume cap, `None` when unbounded.
    pub fn remaining_volume(&self) -> Option<u64> {
        (self.max_volume > 0).then(|| self.max_volume.saturating_sub(self.dispatched_volume))
    }

    /// Requests charged so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched_count
    }

    /// Bytes charged so far.
    pub fn dispatched_volume(&self) -> u64 {
        self.dispatched_volume
    }

    /// Candidates deferred because of the caps.
    pub fn deferred(&self) -> u64 {
        self.deferred
    }

    /// Time left before the next maintenance when the pass started.
    pub fn maintenance_deadline(&self) -> Option<Duration> {
        self.maintenance_deadline
    }

    /// Time since the pass started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
