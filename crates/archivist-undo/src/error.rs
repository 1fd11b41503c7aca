//! Error types for journal listing and recovery.

use archivist_core::{CatalogError, EntryId};
use thiserror::Error;

/// Result type alias for undo operations.
pub type UndoResult<T> = Result<T, UndoError>;

/// Errors surfaced by the journal and the recovery engine.
///
/// Per-entry recovery failures are not errors: they are reported in the
/// [`RecoveryReport`](crate::RecoveryReport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
    /// No removed entry with this identifier.
    #[error("no removed entry {0} in the journal")]
    NotFound(EntryId),

    /// Catalog access failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}
