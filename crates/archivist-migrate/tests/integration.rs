//! End-to-end scheduling scenarios over in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use archivist_core::{now_ms, CopyStatus, HsmStatus};
use archivist_migrate::{
    ActivityClock, Capabilities, CopyStatusPoller, MaintenanceWindow, MigrationParameters,
    PassOutcome,
};
use common::{files, id, Harness};
use proptest::prelude::*;
use tokio::sync::watch;

fn params() -> MigrationParameters {
    MigrationParameters::default()
}

#[tokio::test]
async fn test_unbounded_pass_dispatches_every_candidate() {
    let h = Harness::new(
        MigrationParameters {
            queue_size: 4,
            nb_threads: 2,
            db_request_limit: 7,
            ..params()
        },
        files(50, 1024),
    );

    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.dispatched, 50);
    assert_eq!(report.succeeded, 50);
    assert_eq!(report.deferred, 0);

    h.pool.shutdown().await;
    assert_eq!(common::count_status(&h.catalog, 50, HsmStatus::Archiving).await, 50);
    assert_eq!(h.backend.stats().migrate_calls, 50);
}

#[tokio::test]
async fn test_deferred_candidates_are_picked_up_by_later_passes() {
    let h = Harness::new(
        MigrationParameters {
            max_count: 3,
            ..params()
        },
        files(7, 10),
    );

    let mut dispatched = Vec::new();
    for _ in 0..4 {
        dispatched.push(h.scheduler.run_pass().await.unwrap().dispatched);
    }
    assert_eq!(dispatched, vec![3, 3, 1, 0]);

    h.pool.shutdown().await;
    let mut migrated = h.backend.migrated();
    migrated.sort();
    assert_eq!(migrated, (1..=7).map(id).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_volume_cap_skips_oversized_file() {
    let mut set = files(4, 100);
    set[1].size = 1000;
    let h = Harness::new(
        MigrationParameters {
            max_volume: 350,
            ..params()
        },
        set,
    );

    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.dispatched_volume, 300);
    assert_eq!(report.deferred, 1);
    h.pool.shutdown().await;
    assert_eq!(h.catalog.status_of(&id(2)).await, None);
}

#[tokio::test]
async fn test_failed_request_does_not_abort_pass() {
    let h = Harness::new(params(), files(5, 10));
    h.backend.fail_migration(id(3));

    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.dispatched, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);

    h.pool.shutdown().await;
    assert_eq!(h.catalog.status_of(&id(3)).await, Some(HsmStatus::ArchiveFailed));
    assert_eq!(common::count_status(&h.catalog, 5, HsmStatus::Archiving).await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_idle_pass_times_out_without_requeue() {
    let h = Harness::new(
        MigrationParameters {
            migration_timeout: Duration::from_secs(3600),
            ..params()
        },
        files(3, 10),
    );
    h.backend.set_migrate_delay(Duration::from_secs(3 * 3600));

    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.outcome, PassOutcome::TimedOut);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.elapsed.as_secs(), 3600);

    let next = h.scheduler.run_pass().await.unwrap();
    assert_eq!(next.outcome, PassOutcome::Idle);
    assert_eq!(next.dispatched, 0);
    assert_eq!(h.count_status(3, HsmStatus::Archiving).await, 3);

    h.pool.shutdown().await;
    assert_eq!(h.backend.stats().migrate_calls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_largest_accepted_timeout_runs_a_pass() {
    let loaded = MigrationParameters::from_toml_str(
        "[migration_parameters]\nmigration_timeout = \"18446744073709551615\"\n",
        Capabilities::default(),
    )
    .unwrap();
    assert_eq!(loaded.params.migration_timeout, Duration::from_secs(u64::MAX));

    let h = Harness::new(loaded.params, files(2, 10));
    h.backend.set_migrate_delay(Duration::from_secs(600));
    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.succeeded, 2);
    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_counts_as_activity_only_under_default_clock() {
    for (clock, expected) in [
        (ActivityClock::DispatchAndCompletion, PassOutcome::Completed),
        (ActivityClock::CompletionOnly, PassOutcome::TimedOut),
    ] {
        // Selection takes 30 min per batch and the copy 40 min: the only
        // request is dispatched at 30 min and completes at 70 min. The pass
        // starts waiting at 60 min, after the empty second batch.
        let h = Harness::build(
            MigrationParameters {
                migration_timeout: Duration::from_secs(3600),
                ..params()
            },
            files(1, 10),
            clock,
            Duration::from_secs(30 * 60),
        );
        h.backend.set_migrate_delay(Duration::from_secs(40 * 60));

        let report = h.scheduler.run_pass().await.unwrap();
        assert_eq!(report.outcome, expected, "clock {:?}", clock);
        assert_eq!(report.dispatched, 1);
        h.pool.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_pool_size_and_applies_caps_next_pass() {
    let h = Harness::new(
        MigrationParameters {
            nb_threads: 4,
            max_count: 5,
            ..params()
        },
        files(40, 10),
    );
    h.backend.set_migrate_delay(Duration::from_millis(10));

    let first = h.scheduler.run_pass().await.unwrap();
    assert_eq!(first.dispatched, 5);

    let report = h
        .store
        .reload(MigrationParameters {
            nb_threads: 8,
            max_count: 0,
            ..params()
        })
        .unwrap();
    assert_eq!(report.ignored.len(), 1);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(h.pool.size(), 4);

    let second = h.scheduler.run_pass().await.unwrap();
    assert_eq!(second.dispatched, 35);
    h.pool.shutdown().await;
    assert!(h.backend.stats().peak_concurrent_migrations <= 4);
}

#[tokio::test]
async fn test_maintenance_defers_then_resumes() {
    let h = Harness::new(params(), files(4, 10));
    let now = now_ms();
    h.calendar
        .schedule(
            MaintenanceWindow {
                start_ms: now + 5 * 60 * 1000,
                end_ms: now + 65 * 60 * 1000,
                reason: "catalog upgrade".into(),
            },
            now,
        )
        .unwrap();

    let deferred = h.scheduler.run_pass().await.unwrap();
    assert!(matches!(deferred.outcome, PassOutcome::Deferred { .. }));
    assert_eq!(h.backend.stats().migrate_calls, 0);

    // Window over.
    assert_eq!(h.calendar.prune(now + 66 * 60 * 1000), 1);
    let resumed = h.scheduler.run_pass().await.unwrap();
    assert_eq!(resumed.outcome, PassOutcome::Completed);
    assert_eq!(resumed.dispatched, 4);
    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_pre_maintenance_still_dispatches() {
    let h = Harness::new(params(), files(2, 10));
    let now = now_ms();
    h.calendar
        .schedule(
            MaintenanceWindow {
                start_ms: now + 6 * 3600 * 1000,
                end_ms: now + 7 * 3600 * 1000,
                reason: "power work".into(),
            },
            now,
        )
        .unwrap();

    let report = h.scheduler.run_pass().await.unwrap();
    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.dispatched, 2);
    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_poller_confirms_what_the_scheduler_dispatched() {
    let h = Harness::new(params(), files(6, 10));
    h.scheduler.run_pass().await.unwrap();
    for seq in 1..=4 {
        h.backend.set_copy_status(id(seq), CopyStatus::Done);
    }
    h.backend.set_copy_status(id(5), CopyStatus::Failed);

    let poller = CopyStatusPoller::new(h.store.subscribe(), h.catalog.clone(), h.backend.clone());
    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.checked, 6);
    assert_eq!(report.confirmed, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.in_flight, 1);

    assert_eq!(h.count_status(6, HsmStatus::Synchro).await, 4);
    assert_eq!(h.catalog.status_of(&id(5)).await, Some(HsmStatus::ArchiveFailed));
    assert_eq!(h.backend.stats().migrate_calls, 6);

    // The failed entry is eligible again; the confirmed ones are not.
    let next = h.scheduler.run_pass().await.unwrap();
    assert_eq!(next.dispatched, 1);
    h.pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_loop_runs_every_interval_until_shutdown() {
    let h = Arc::new(Harness::new(
        MigrationParameters {
            max_count: 1,
            runtime_interval: Duration::from_secs(300),
            ..params()
        },
        files(10, 10),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.scheduler.run(stop_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(300 * 3 + 10)).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap();

    assert_eq!(h.backend.stats().migrate_calls, 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_count_cap_is_never_exceeded(
        max_count in 1u64..12,
        n in 0u64..40,
        batch in 0usize..6,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatched = rt.block_on(async {
            let h = Harness::new(
                MigrationParameters {
                    max_count,
                    db_request_limit: batch,
                    ..params()
                },
                files(n, 10),
            );
            let report = h.scheduler.run_pass().await.unwrap();
            h.pool.shutdown().await;
            report.dispatched
        });
        prop_assert!(dispatched <= max_count);
        prop_assert_eq!(dispatched, n.min(max_count));
    }
}
