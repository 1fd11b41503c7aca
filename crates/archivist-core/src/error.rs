//! Error types for the catalog and backend collaborators.

use thiserror::Error;

use crate::types::EntryId;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Insert of a record whose identifier is already present.
    #[error("entry {0} already exists in the catalog")]
    AlreadyExists(EntryId),

    /// The addressed record does not exist.
    #[error("entry {0} not found")]
    NotFound(EntryId),

    /// The catalog could not serve the request.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Whether this is an insert conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::AlreadyExists(_))
    }

    /// Whether the addressed record was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound(_))
    }
}

/// Errors reported by the archival backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// A single request failed; other requests are unaffected.
    #[error("backend request for {id} failed: {reason}")]
    Transient {
        /// Entry the request was about.
        id: EntryId,
        /// Description of the failure.
        reason: String,
    },

    /// The backend cannot be reached at all.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
