#![warn(missing_docs)]

//! Archivist undo: listing of soft-deleted entries and their recovery.
//!
//! Removed entries stay in the catalog's removal journal until they expire.
//! [`SoftDeleteJournal`] enumerates them under a path or identifier filter;
//! [`RecoveryEngine`] restores them from the backend and records them in the
//! catalog again.

pub mod error;
pub mod filter;
pub mod journal;
pub mod recovery;

pub use error::{UndoError, UndoResult};
pub use filter::{RemovedFilter, PATH_SEPARATOR};
pub use journal::{RemovedList, SoftDeleteJournal, DEFAULT_PAGE_SIZE};
pub use recovery::{EntryRecovery, RecoveryEngine, RecoveryReport, Upsert};
