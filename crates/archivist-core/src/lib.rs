#![warn(missing_docs)]

//! Archivist core: shared domain types and the collaborator interfaces of the
//! HSM policy engine.
//!
//! The catalog (relational metadata store) and the backend (archival target)
//! are external systems. This crate defines the operations the engine consumes
//! from them and ships in-memory implementations of both.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod filter;
pub mod types;

pub use backend::{Backend, CopyStatus, MigrateReceipt, MockBackend, MockBackendStats, RecoverReply};
pub use catalog::{Catalog, CatalogUpdate, MemoryCatalog, MemoryCatalogStats};
pub use error::{BackendError, BackendResult, CatalogError, CatalogResult};
pub use filter::{EntryFilter, PathPredicate};
pub use types::{
    now_ms, now_secs, AttrSet, EntryId, HsmStatus, MigrationRequest, ParseEntryIdError,
    RecoveryOutcome, RemovedEntry,
};
