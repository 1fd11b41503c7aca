//! Listing and recovery of removed entries against in-memory collaborators.

use std::sync::Arc;

use archivist_core::{
    AttrSet, Catalog, EntryId, HsmStatus, MemoryCatalog, MockBackend, RecoverReply,
    RecoveryOutcome, RemovedEntry,
};
use archivist_undo::{EntryRecovery, RecoveryEngine, RemovedFilter, Upsert};

const F1: EntryId = EntryId::new(0x200000400, 0x1, 0x0);

fn removed(id: EntryId, path: &str, backend_path: Option<&str>) -> RemovedEntry {
    RemovedEntry {
        id,
        last_known_path: path.to_string(),
        backend_path: backend_path.map(str::to_string),
        soft_rm_time: 1_700_000_000,
        expiration_time: 1_700_086_400,
    }
}

async fn setup(entries: Vec<RemovedEntry>) -> (Arc<MemoryCatalog>, Arc<MockBackend>, RecoveryEngine) {
    let catalog = Arc::new(MemoryCatalog::new());
    for entry in entries {
        catalog.add_removed(entry).await;
    }
    let backend = Arc::new(MockBackend::new());
    let engine = RecoveryEngine::new(catalog.clone(), backend.clone(), 2);
    (catalog, backend, engine)
}

#[tokio::test]
async fn test_restore_single_file() {
    let (catalog, _backend, engine) =
        setup(vec![removed(F1, "/mnt/fs/file1", Some("bk/1"))]).await;

    let report = engine.recover(&RemovedFilter::parse("/mnt/fs/file1")).await.unwrap();
    assert_eq!(
        report.entries,
        vec![EntryRecovery::Restored {
            old_id: F1,
            new_id: F1,
            outcome: RecoveryOutcome::Recovered,
            upsert: Upsert::Inserted,
        }]
    );
    assert_eq!(catalog.entry_count().await, 1);
    assert_eq!(catalog.removed_count().await, 0);
    let attrs = catalog.get(&F1).await.unwrap().unwrap();
    assert_eq!(attrs.fullpath.as_deref(), Some("/mnt/fs/file1"));
    assert_eq!(attrs.backend_path.as_deref(), Some("bk/1"));
}

#[tokio::test]
async fn test_restore_over_existing_record_updates_it() {
    let (catalog, _backend, engine) =
        setup(vec![removed(F1, "/mnt/fs/file1", Some("bk/1"))]).await;
    catalog
        .put(
            F1,
            AttrSet {
                status: Some(HsmStatus::Synchro),
                ..AttrSet::with_path("/mnt/fs/stale")
            },
        )
        .await;

    let report = engine.recover(&RemovedFilter::Id(F1)).await.unwrap();
    assert!(matches!(
        report.entries[0],
        EntryRecovery::Restored {
            upsert: Upsert::Updated,
            ..
        }
    ));
    assert_eq!(catalog.entry_count().await, 1);
    assert_eq!(catalog.removed_count().await, 0);
    let attrs = catalog.get(&F1).await.unwrap().unwrap();
    assert_eq!(attrs.fullpath.as_deref(), Some("/mnt/fs/file1"));
    assert_eq!(attrs.status, Some(HsmStatus::Synchro));
}

#[tokio::test]
async fn test_recovery_retry_is_idempotent() {
    let entry = removed(F1, "/mnt/fs/file1", Some("bk/1"));
    let (catalog, backend, engine) = setup(vec![entry.clone()]).await;

    let first = engine.recover_entry(&entry).await;
    assert!(matches!(first, EntryRecovery::Restored { upsert: Upsert::Inserted, .. }));

    let again = engine.recover_entry(&entry).await;
    assert!(matches!(again, EntryRecovery::Restored { upsert: Upsert::Updated, .. }));
    assert_eq!(catalog.entry_count().await, 1);
    assert_eq!(catalog.removed_count().await, 0);
    assert_eq!(catalog.stats().await.discards, 1);

    // Nothing left to list, so a filtered run is a no-op.
    let report = engine.recover(&RemovedFilter::Id(F1)).await.unwrap();
    assert!(report.entries.is_empty());
    assert_eq!(backend.stats().recover_calls, 2);
}

#[tokio::test]
async fn test_unknown_path_is_skipped() {
    let orphan = EntryId::new(7, 0, 0);
    let (catalog, backend, engine) = setup(vec![
        removed(orphan, "", Some("bk/7")),
        removed(EntryId::new(8, 0, 0), "/mnt/fs/file8", None),
    ])
    .await;

    let report = engine.recover(&RemovedFilter::All).await.unwrap();
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.restored(), 1);
    assert_eq!(
        report.entries[0],
        EntryRecovery::Skipped {
            id: orphan,
            backend_path: Some("bk/7".into()),
        }
    );
    assert!(catalog.has_removed(&orphan).await);
    assert_eq!(catalog.get(&orphan).await.unwrap(), None);
    assert_eq!(backend.stats().recover_calls, 1);
}

#[tokio::test]
async fn test_directory_filter_spares_siblings() {
    let (catalog, _backend, engine) = setup(vec![
        removed(EntryId::new(1, 0, 0), "/a/b", None),
        removed(EntryId::new(2, 0, 0), "/a/b/c", None),
        removed(EntryId::new(3, 0, 0), "/a/bc", None),
        removed(EntryId::new(4, 0, 0), "/a/b/c/d", None),
        removed(EntryId::new(5, 0, 0), "/z", None),
    ])
    .await;

    let report = engine.recover(&RemovedFilter::parse("/a/b/")).await.unwrap();
    assert_eq!(report.restored(), 3);
    assert!(catalog.has_removed(&EntryId::new(3, 0, 0)).await);
    assert!(catalog.has_removed(&EntryId::new(5, 0, 0)).await);
    assert_eq!(catalog.removed_count().await, 2);
}

#[tokio::test]
async fn test_restore_under_new_identifier() {
    let (catalog, backend, engine) =
        setup(vec![removed(F1, "/mnt/fs/file1", Some("bk/1"))]).await;
    let new_id = EntryId::new(0x200000401, 0x5, 0x0);
    backend.script_recovery(
        F1,
        RecoverReply {
            outcome: RecoveryOutcome::PartiallyRecovered,
            new_id,
            new_attrs: AttrSet::with_path("/mnt/fs/file1"),
        },
    );

    let report = engine.recover(&RemovedFilter::All).await.unwrap();
    assert_eq!(
        report.entries,
        vec![EntryRecovery::Restored {
            old_id: F1,
            new_id,
            outcome: RecoveryOutcome::PartiallyRecovered,
            upsert: Upsert::Inserted,
        }]
    );
    assert_eq!(catalog.get(&F1).await.unwrap(), None);
    assert!(catalog.get(&new_id).await.unwrap().is_some());
}
