//! Selection of removed entries by path or identifier.

use std::fmt;

use archivist_core::{EntryFilter, EntryId, PathPredicate, RemovedEntry};
use serde::{Deserialize, Serialize};

/// Separator of namespace path components.
pub const PATH_SEPARATOR: char = '/';

/// Which removed entries an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemovedFilter {
    /// Every removed entry.
    #[default]
    All,
    /// The entry with this identifier.
    Id(EntryId),
    /// The entry at this path and everything below it.
    Path(String),
}

impl RemovedFilter {
    /// Interprets an operator argument: empty selects everything, an entry
    /// identifier selects that entry, anything else is a path.
    pub fn parse(arg: &str) -> Self {
        let arg = arg.trim();
        if arg.is_empty() {
            return RemovedFilter::All;
        }
        match arg.parse::<EntryId>() {
            Ok(id) => RemovedFilter::Id(id),
            Err(_) => RemovedFilter::Path(arg.to_string()),
        }
    }

    /// Translates the filter into catalog predicates.
    ///
    /// A path `F` selects `F` itself and everything under `F/`. A trailing
    /// separator on `F` is ignored for the equality test only.
    pub fn to_entry_filter(&self) -> EntryFilter {
        match self {
            RemovedFilter::All => EntryFilter::All,
            RemovedFilter::Id(id) => EntryFilter::Id(*id),
            RemovedFilter::Path(path) => {
                let (exact, prefix) = match path.strip_suffix(PATH_SEPARATOR) {
                    Some(stripped) => (stripped.to_string(), path.clone()),
                    None => (path.clone(), format!("{}{}", path, PATH_SEPARATOR)),
                };
                EntryFilter::AnyPath(vec![
                    PathPredicate::Equals(exact),
                    PathPredicate::StartsWith(prefix),
                ])
            }
        }
    }

    /// Evaluates the filter against one removed entry.
    pub fn matches(&self, entry: &RemovedEntry) -> bool {
        self.to_entry_filter().matches(&entry.id, &entry.last_known_path)
    }
}

impl fmt::Display for RemovedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovedFilter::All => write!(f, "all entries"),
            RemovedFilter::Id(id) => write!(f, "id {}", id),
            RemovedFilter::Path(path) => write!(f, "path {}", path),
        }
    }
}
