//! Catalog-side filter predicates for removed-entry enumeration.
//!
//! Predicates in an [`EntryFilter::AnyPath`] filter are OR'd, the same way a
//! relational catalog would translate them to `fullpath = ? OR fullpath LIKE ?`.

use serde::{Deserialize, Serialize};

use crate::types::EntryId;

/// A single predicate on an entry path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathPredicate {
    /// Path is exactly the given string.
    Equals(String),
    /// Path starts with the given string.
    StartsWith(String),
}

impl PathPredicate {
    /// Evaluates the predicate against `path`.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPredicate::Equals(expected) => path == expected,
            PathPredicate::StartsWith(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// Filter applied by the catalog when enumerating removed entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntryFilter {
    /// Every entry.
    #[default]
    All,
    /// Only the entry with this identifier.
    Id(EntryId),
    /// Entries whose path satisfies at least one predicate.
    AnyPath(Vec<PathPredicate>),
}

impl EntryFilter {
    /// Evaluates the filter for an entry.
    pub fn matches(&self, id: &EntryId, path: &str) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Id(wanted) => wanted == id,
            EntryFilter::AnyPath(predicates) => predicates.iter().any(|p| p.matches(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_or_together() {
        let filter = EntryFilter::AnyPath(vec![
            PathPredicate::Equals("/a/b".into()),
            PathPredicate::StartsWith("/a/b/".into()),
        ]);
        let id = EntryId::new(1, 0, 0);
        assert!(filter.matches(&id, "/a/b"));
        assert!(filter.matches(&id, "/a/b/c"));
        assert!(!filter.matches(&id, "/a/bc"));
    }

    #[test]
    fn test_id_filter_ignores_path() {
        let wanted = EntryId::new(4, 2, 0);
        let filter = EntryFilter::Id(wanted);
        assert!(filter.matches(&wanted, ""));
        assert!(!filter.matches(&EntryId::new(4, 3, 0), "/a"));
    }

    #[test]
    fn test_empty_any_path_matches_nothing() {
        let filter = EntryFilter::AnyPath(Vec::new());
        assert!(!filter.matches(&EntryId::new(1, 1, 1), "/a"));
        assert!(EntryFilter::All.matches(&EntryId::new(1, 1, 1), ""));
    }
}
