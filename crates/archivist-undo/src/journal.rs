//! The soft-delete journal: removed entries kept for possible restoration.
//!
//! Listing is lazy and paged: [`RemovedList`] fetches one page from the
//! catalog at a time, in the catalog's native key order. Its cursor is the
//! last identifier handed out, so a listing can be resumed after it later.

use std::collections::VecDeque;
use std::sync::Arc;

use archivist_core::{Catalog, CatalogError, EntryFilter, EntryId, RemovedEntry};
use tracing::debug;

use crate::error::{UndoError, UndoResult};
use crate::filter::RemovedFilter;

/// Default page size for journal listings.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Access to the removal journal of a catalog.
#[derive(Clone)]
pub struct SoftDeleteJournal {
    catalog: Arc<dyn Catalog>,
    page_size: usize,
}

impl SoftDeleteJournal {
    /// Creates a journal reading pages of `page_size` entries (0 means a
    /// single unbounded page).
    pub fn new(catalog: Arc<dyn Catalog>, page_size: usize) -> Self {
        Self { catalog, page_size }
    }

    /// Creates a journal with the default page size.
    pub fn with_default_page_size(catalog: Arc<dyn Catalog>) -> Self {
        Self::new(catalog, DEFAULT_PAGE_SIZE)
    }

    /// Starts listing the entries selected by `filter`.
    pub fn list(&self, filter: &RemovedFilter) -> RemovedList {
        RemovedList::new(Arc::clone(&self.catalog), filter.to_entry_filter(), self.page_size, None)
    }

    /// Resumes a listing after the entry `after`.
    pub fn resume(&self, filter: &RemovedFilter, after: EntryId) -> RemovedList {
        RemovedList::new(
            Arc::clone(&self.catalog),
            filter.to_entry_filter(),
            self.page_size,
            Some(after),
        )
    }

    /// Lists every selected entry at once.
    pub async fn collect(&self, filter: &RemovedFilter) -> UndoResult<Vec<RemovedEntry>> {
        let mut list = self.list(filter);
        let mut entries = Vec::new();
        while let Some(entry) = list.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Removes one entry from the journal.
    pub async fn discard(&self, id: &EntryId) -> UndoResult<()> {
        match self.catalog.discard_removed(id).await {
            Ok(()) => {
                debug!(id = %id, "removed entry discarded");
                Ok(())
            }
            Err(CatalogError::NotFound(id)) => Err(UndoError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

/// A lazy, restartable listing of removed entries.
pub struct RemovedList {
    catalog: Arc<dyn Catalog>,
    filter: EntryFilter,
    page_size: usize,
    buffer: VecDeque<RemovedEntry>,
    fetched_up_to: Option<EntryId>,
    cursor: Option<EntryId>,
    exhausted: bool,
}

impl RemovedList {
    fn new(
        catalog: Arc<dyn Catalog>,
        filter: EntryFilter,
        page_size: usize,
        after: Option<EntryId>,
    ) -> Self {
        Self {
            catalog,
            filter,
            page_size,
            buffer: VecDeque::new(),
            fetched_up_to: after,
            cursor: after,
            exhausted: false,
        }
    }

    /// Returns the next entry, or `None` once the journal is exhausted.
    pub async fn next(&mut self) -> UndoResult<Option<RemovedEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        let entry = self.buffer.pop_front();
        if let Some(entry) = &entry {
            self.cursor = Some(entry.id);
        }
        Ok(entry)
    }

    /// Identifier of the last entry returned by [`next`](Self::next).
    pub fn cursor(&self) -> Option<EntryId> {
        self.cursor
    }

    async fn fetch_page(&mut self) -> UndoResult<()> {
        let page = self
            .catalog
            .list_removed(&self.filter, self.fetched_up_to, self.page_size)
            .await?;
        debug!(count = page.len(), after = ?self.fetched_up_to, "removed entries page");
        if self.page_size == 0 || page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.fetched_up_to = Some(last.id);
        }
        self.buffer.extend(page);
        Ok(())
    }
}
