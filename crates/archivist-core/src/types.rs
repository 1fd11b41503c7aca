//! Domain types shared by the migration scheduler and the undo pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returns the current wall-clock time in seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Catalog identifier of a namespace entry.
///
/// Displayed and parsed as `[0x<seq>:0x<oid>:0x<ver>]`. Ordering follows the
/// catalog's native key ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId {
    /// Sequence number.
    pub seq: u64,
    /// Object id within the sequence.
    pub oid: u32,
    /// Version.
    pub ver: u32,
}

impl EntryId {
    /// Creates a new identifier.
    pub const fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Self { seq, oid, ver }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}:{:#x}:{:#x}]", self.seq, self.oid, self.ver)
    }
}

/// Error returned when a string is not a valid [`EntryId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entry id: {0}")]
pub struct ParseEntryIdError(pub String);

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseEntryIdError(s.to_string());
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(trimmed);

        let mut parts = inner.split(':');
        let (seq, oid, ver) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(seq), Some(oid), Some(ver), None) => (seq, oid, ver),
            _ => return Err(err()),
        };

        fn hex(part: &str) -> Option<u64> {
            let digits = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            u64::from_str_radix(digits, 16).ok()
        }

        let seq = hex(seq).ok_or_else(err)?;
        let oid = hex(oid).and_then(|v| u32::try_from(v).ok()).ok_or_else(err)?;
        let ver = hex(ver).and_then(|v| u32::try_from(v).ok()).ok_or_else(err)?;
        Ok(EntryId { seq, oid, ver })
    }
}

/// HSM state of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HsmStatus {
    /// Never archived.
    New,
    /// Modified since its last archive.
    Modified,
    /// Archive request dispatched, not yet confirmed.
    Archiving,
    /// Archived copy is up to date.
    Synchro,
    /// The last archive request failed.
    ArchiveFailed,
}

impl HsmStatus {
    /// Whether an archive request for the entry is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, HsmStatus::Archiving)
    }
}

/// Attribute set exchanged with the catalog and the backend.
///
/// Unset fields are left untouched when merged into an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSet {
    /// Full namespace path.
    pub fullpath: Option<String>,
    /// Path of the archived copy in the backend.
    pub backend_path: Option<String>,
    /// Size in bytes.
    pub size: Option<u64>,
    /// HSM state.
    pub status: Option<HsmStatus>,
    /// Time of the last archive request (seconds since epoch).
    pub last_archive: Option<u64>,
}

impl AttrSet {
    /// An attribute set carrying only a path.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            fullpath: Some(path.into()),
            ..Self::default()
        }
    }

    /// Overlays every field set in `other` onto `self`.
    pub fn merge(&mut self, other: &AttrSet) {
        if let Some(path) = &other.fullpath {
            self.fullpath = Some(path.clone());
        }
        if let Some(bk) = &other.backend_path {
            self.backend_path = Some(bk.clone());
        }
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.last_archive.is_some() {
            self.last_archive = other.last_archive;
        }
    }
}

/// A request to archive one entry, produced by candidate selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Entry to archive.
    pub id: EntryId,
    /// Namespace path of the entry.
    pub path: String,
    /// Existing backend path, if the entry was archived before.
    pub backend_path: Option<String>,
    /// Size in bytes, charged against the pass volume cap.
    pub size: u64,
    /// Time the request was queued (milliseconds since epoch).
    pub enqueued_at_ms: u64,
}

impl MigrationRequest {
    /// Creates a request stamped with the current time.
    pub fn new(id: EntryId, path: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            path: path.into(),
            backend_path: None,
            size,
            enqueued_at_ms: now_ms(),
        }
    }

    /// Sets the backend path of a previously archived entry.
    pub fn with_backend_path(mut self, backend_path: impl Into<String>) -> Self {
        self.backend_path = Some(backend_path.into());
        self
    }
}

/// A soft-deleted entry retained in the removal journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntry {
    /// Identifier the entry had when it was removed.
    pub id: EntryId,
    /// Last known namespace path; empty when unknown.
    pub last_known_path: String,
    /// Backend copy, if any.
    pub backend_path: Option<String>,
    /// Removal time (seconds since epoch).
    pub soft_rm_time: u64,
    /// Time after which the entry may be purged (seconds since epoch).
    pub expiration_time: u64,
}

impl RemovedEntry {
    /// Whether the last known path is unknown.
    pub fn path_unknown(&self) -> bool {
        self.last_known_path.is_empty()
    }

    /// Whether the retention delay has elapsed at `now` (seconds since epoch).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_time <= now
    }

    /// Attributes handed to the backend to restore this entry.
    pub fn restore_target(&self) -> AttrSet {
        AttrSet {
            fullpath: Some(self.last_known_path.clone()),
            backend_path: self.backend_path.clone(),
            ..AttrSet::default()
        }
    }
}

/// Result of a backend recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOutcome {
    /// Fully restored.
    Recovered,
    /// Restored with discrepancies (delta recovery).
    PartiallyRecovered,
    /// Not restored.
    Failed,
}

impl RecoveryOutcome {
    /// Whether the entry now exists in the namespace again.
    pub fn is_restored(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered | RecoveryOutcome::PartiallyRecovered)
    }
}
