//! Catalog collaborator: the relational store of namespace metadata.
//!
//! The engine only consumes the operations below; query planning, storage and
//! write serialization belong to the catalog itself. [`MemoryCatalog`] is an
//! in-process implementation for tests and embedders.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::filter::EntryFilter;
use crate::types::{AttrSet, EntryId, HsmStatus, RemovedEntry};

/// One attribute write, applied by merging into the existing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogUpdate {
    /// Record to update.
    pub id: EntryId,
    /// Attributes to overlay.
    pub attrs: AttrSet,
}

/// Operations the engine consumes from the catalog.
///
/// A `limit` of 0 on paged operations means "no limit". Pages are returned in
/// the catalog's native key order, strictly after the `after` cursor.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Enumerates removed entries matching `filter`.
    async fn list_removed(
        &self,
        filter: &EntryFilter,
        after: Option<EntryId>,
        limit: usize,
    ) -> CatalogResult<Vec<RemovedEntry>>;

    /// Removes one removed-entry record. Fails with `NotFound` if absent.
    async fn discard_removed(&self, id: &EntryId) -> CatalogResult<()>;

    /// Inserts a record. Fails with `AlreadyExists` if the identifier is taken.
    async fn insert(&self, id: &EntryId, attrs: &AttrSet) -> CatalogResult<()>;

    /// Updates an existing record. Fails with `NotFound` if absent.
    async fn update(&self, id: &EntryId, attrs: &AttrSet) -> CatalogResult<()>;

    /// Reads one record.
    async fn get(&self, id: &EntryId) -> CatalogResult<Option<AttrSet>>;

    /// Marks a batch of entries as having an outstanding archive request.
    async fn mark_in_flight(&self, ids: &[EntryId], since: u64) -> CatalogResult<()>;

    /// Applies a batch of attribute writes.
    async fn apply_updates(&self, updates: &[CatalogUpdate]) -> CatalogResult<()>;

    /// Enumerates entries with an outstanding archive request.
    async fn list_outstanding(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> CatalogResult<Vec<(EntryId, AttrSet)>>;
}

/// Operation counters of a [`MemoryCatalog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCatalogStats {
    /// Successful inserts.
    pub inserts: u64,
    /// Inserts rejected with `AlreadyExists`.
    pub conflicts: u64,
    /// Successful single-record updates.
    pub updates: u64,
    /// Removed-entry records discarded.
    pub discards: u64,
    /// Batched writes (`mark_in_flight` and `apply_updates` calls).
    pub batch_writes: u64,
    /// Largest batch seen by a batched write.
    pub largest_batch: usize,
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<EntryId, AttrSet>,
    removed: BTreeMap<EntryId, RemovedEntry>,
    failing: HashSet<EntryId>,
    stats: MemoryCatalogStats,
}

impl MemoryState {
    fn check_failing(&self, id: &EntryId) -> CatalogResult<()> {
        if self.failing.contains(id) {
            return Err(CatalogError::Unavailable(format!("injected failure for {}", id)));
        }
        Ok(())
    }

    fn note_batch(&mut self, len: usize) {
        self.stats.batch_writes += 1;
        self.stats.largest_batch = self.stats.largest_batch.max(len);
    }
}

fn range_after<V>(
    map: &BTreeMap<EntryId, V>,
    after: Option<EntryId>,
) -> std::collections::btree_map::Range<'_, EntryId, V> {
    match after {
        Some(cursor) => map.range((Bound::Excluded(cursor), Bound::Unbounded)),
        None => map.range(..),
    }
}

fn page_len(limit: usize) -> usize {
    if limit == 0 {
        usize::MAX
    } else {
        limit
    }
}

/// In-memory catalog keyed by [`EntryId`].
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, replacing any previous one.
    pub async fn put(&self, id: EntryId, attrs: AttrSet) {
        self.state.lock().await.entries.insert(id, attrs);
    }

    /// Adds a removed-entry record to the journal.
    pub async fn add_removed(&self, entry: RemovedEntry) {
        self.state.lock().await.removed.insert(entry.id, entry);
    }

    /// Makes every write addressed to `id` fail with `Unavailable`.
    pub async fn fail_writes_for(&self, id: EntryId) {
        self.state.lock().await.failing.insert(id);
    }

    /// Number of namespace records.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Number of removed-entry records.
    pub async fn removed_count(&self) -> usize {
        self.state.lock().await.removed.len()
    }

    /// Whether a removed-entry record exists for `id`.
    pub async fn has_removed(&self, id: &EntryId) -> bool {
        self.state.lock().await.removed.contains_key(id)
    }

    /// Status of one record.
    pub async fn status_of(&self, id: &EntryId) -> Option<HsmStatus> {
        self.state
            .lock()
            .await
            .entries
            .get(id)
            .and_then(|attrs| attrs.status)
    }

    /// Snapshot of the operation counters.
    pub async fn stats(&self) -> MemoryCatalogStats {
        self.state.lock().await.stats.clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_removed(
        &self,
        filter: &EntryFilter,
        after: Option<EntryId>,
        limit: usize,
    ) -> CatalogResult<Vec<RemovedEntry>> {
        let state = self.state.lock().await;
        let page: Vec<RemovedEntry> = range_after(&state.removed, after)
            .filter(|(id, entry)| filter.matches(id, &entry.last_known_path))
            .take(page_len(limit))
            .map(|(_, entry)| entry.clone())
            .collect();
        debug!(count = page.len(), "memory catalog: list_removed");
        Ok(page)
    }

    async fn discard_removed(&self, id: &EntryId) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        state.check_failing(id)?;
        if state.removed.remove(id).is_none() {
            return Err(CatalogError::NotFound(*id));
        }
        state.stats.discards += 1;
        Ok(())
    }

    async fn insert(&self, id: &EntryId, attrs: &AttrSet) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        state.check_failing(id)?;
        if state.entries.contains_key(id) {
            state.stats.conflicts += 1;
            return Err(CatalogError::AlreadyExists(*id));
        }
        state.entries.insert(*id, attrs.clone());
        state.stats.inserts += 1;
        Ok(())
    }

    async fn update(&self, id: &EntryId, attrs: &AttrSet) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        state.check_failing(id)?;
        let record = state
            .entries
            .get_mut(id)
            .ok_or(CatalogError::NotFound(*id))?;
        record.merge(attrs);
        state.stats.updates += 1;
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> CatalogResult<Option<AttrSet>> {
        Ok(self.state.lock().await.entries.get(id).cloned())
    }

    async fn mark_in_flight(&self, ids: &[EntryId], since: u64) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        for id in ids {
            state.check_failing(id)?;
        }
        for id in ids {
            let record = state.entries.entry(*id).or_default();
            record.status = Some(HsmStatus::Archiving);
            record.last_archive = Some(since);
        }
        state.note_batch(ids.len());
        Ok(())
    }

    async fn apply_updates(&self, updates: &[CatalogUpdate]) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        for update in updates {
            state.check_failing(&update.id)?;
        }
        for update in updates {
            state.entries.entry(update.id).or_default().merge(&update.attrs);
        }
        state.note_batch(updates.len());
        Ok(())
    }

    async fn list_outstanding(
        &self,
        after: Option<EntryId>,
        limit: usize,
    ) -> CatalogResult<Vec<(EntryId, AttrSet)>> {
        let state = self.state.lock().await;
        Ok(range_after(&state.entries, after)
            .filter(|(_, attrs)| attrs.status.map(|s| s.is_in_flight()).unwrap_or(false))
            .take(page_len(limit))
            .map(|(id, attrs)| (*id, attrs.clone()))
            .collect())
    }
}
