//! Migration parameters and their documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::literal::{format_bool, format_duration, format_size};

/// How the namespace addresses entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressingMode {
    /// Entries are addressed by catalog identifier.
    #[default]
    Fid,
    /// Entries are addressed by path.
    Path,
}

/// Capabilities of the deployment, resolved when the configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Backup-to-external-storage flavor: enables `backup_new_files`.
    pub backup: bool,
    /// Addressing mode of the namespace.
    pub addressing: AddressingMode,
}

impl Capabilities {
    /// Capabilities of a backup deployment.
    pub fn backup() -> Self {
        Self {
            backup: true,
            addressing: AddressingMode::Fid,
        }
    }
}

/// Parameter names, as spelled in the parameters block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    /// `runtime_interval`
    RuntimeInterval,
    /// `max_migration_count`
    MaxCount,
    /// `max_migration_volume`
    MaxVolume,
    /// `migration_timeout`
    MigrationTimeout,
    /// `backup_new_files`
    BackupNewFiles,
    /// `check_copy_status_on_startup`
    CheckCopyStatusOnStartup,
    /// `check_copy_status_delay`
    CheckCopyStatusDelay,
    /// `nb_threads_migration`
    NbThreads,
    /// `migration_queue_size`
    QueueSize,
    /// `db_result_size_max`
    DbRequestLimit,
    /// `pre_maintenance_window`
    PreMaintenanceWindow,
    /// `maint_migr_delay_min`
    MaintMinMigrDelay,
}

impl ParamKey {
    /// Every parameter, in block order.
    pub const ALL: [ParamKey; 12] = [
        ParamKey::RuntimeInterval,
        ParamKey::MaxCount,
        ParamKey::MaxVolume,
        ParamKey::MigrationTimeout,
        ParamKey::BackupNewFiles,
        ParamKey::CheckCopyStatusOnStartup,
        ParamKey::CheckCopyStatusDelay,
        ParamKey::NbThreads,
        ParamKey::QueueSize,
        ParamKey::DbRequestLimit,
        ParamKey::PreMaintenanceWindow,
        ParamKey::MaintMinMigrDelay,
    ];

    /// Name of the key in the parameters block.
    pub fn name(&self) -> &'static str {
        match self {
            ParamKey::RuntimeInterval => "runtime_interval",
            ParamKey::MaxCount => "max_migration_count",
            ParamKey::MaxVolume => "max_migration_volume",
            ParamKey::MigrationTimeout => "migration_timeout",
            ParamKey::BackupNewFiles => "backup_new_files",
            ParamKey::CheckCopyStatusOnStartup => "check_copy_status_on_startup",
            ParamKey::CheckCopyStatusDelay => "check_copy_status_delay",
            ParamKey::NbThreads => "nb_threads_migration",
            ParamKey::QueueSize => "migration_queue_size",
            ParamKey::DbRequestLimit => "db_result_size_max",
            ParamKey::PreMaintenanceWindow => "pre_maintenance_window",
            ParamKey::MaintMinMigrDelay => "maint_migr_delay_min",
        }
    }

    /// Looks a key up by its block name.
    pub fn from_name(name: &str) -> Option<ParamKey> {
        ParamKey::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Static keys are frozen after the first load; reloads cannot change them.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            ParamKey::NbThreads | ParamKey::QueueSize | ParamKey::CheckCopyStatusOnStartup
        )
    }
}

/// Validated parameters of the migration policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationParameters {
    /// Delay between two scheduling passes.
    pub runtime_interval: Duration,
    /// Per-pass request cap; 0 means unbounded.
    pub max_count: u64,
    /// Per-pass volume cap in bytes; 0 means unbounded.
    pub max_volume: u64,
    /// Inactivity delay after which a pass is abandoned.
    pub migration_timeout: Duration,
    /// Capacity of the migration queue (static).
    pub queue_size: usize,
    /// Number of migration workers (static).
    pub nb_threads: usize,
    /// Chunk size for catalog reads and writes; 0 means no chunking.
    pub db_request_limit: usize,
    /// Whether the poller runs a cycle right at start-up (static).
    pub check_copy_status_on_startup: bool,
    /// Delay between two copy-status polls.
    pub check_copy_status_delay: Duration,
    /// How long before a maintenance the pre-maintenance mode starts.
    pub pre_maintenance_window: Duration,
    /// No dispatch when the next maintenance is closer than this.
    pub maint_min_migr_delay: Duration,
    /// Archive entries that were never archived before. Only present with the
    /// backup capability.
    pub backup_new_files: Option<bool>,
}

impl MigrationParameters {
    /// Documented defaults for the given capabilities.
    pub fn defaults(caps: Capabilities) -> Self {
        Self {
            runtime_interval: Duration::from_secs(5 * 60),
            max_count: 0,
            max_volume: 0,
            migration_timeout: Duration::from_secs(2 * 3600),
            queue_size: 4096,
            nb_threads: 4,
            db_request_limit: 10_000,
            check_copy_status_on_startup: true,
            check_copy_status_delay: Duration::from_secs(30 * 60),
            pre_maintenance_window: Duration::from_secs(24 * 3600),
            maint_min_migr_delay: Duration::from_secs(30 * 60),
            backup_new_files: caps.backup.then_some(true),
        }
    }

    /// Checks the invariants that parsing alone cannot guarantee.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.nb_threads < 1 {
            return Err(ConfigError::validation(ParamKey::NbThreads.name(), "must be at least 1"));
        }
        if self.queue_size < 1 {
            return Err(ConfigError::validation(ParamKey::QueueSize.name(), "must be at least 1"));
        }
        for (key, value) in [
            (ParamKey::RuntimeInterval, self.runtime_interval),
            (ParamKey::MigrationTimeout, self.migration_timeout),
            (ParamKey::CheckCopyStatusDelay, self.check_copy_status_delay),
        ] {
            if value.is_zero() {
                return Err(ConfigError::validation(key.name(), "must be strictly positive"));
            }
        }
        Ok(())
    }

    /// Renders one parameter in literal form, `None` when absent.
    pub fn render(&self, key: ParamKey) -> Option<String> {
        Some(match key {
            ParamKey::RuntimeInterval => format_duration(self.runtime_interval),
            ParamKey::MaxCount => self.max_count.to_string(),
            ParamKey::MaxVolume => format_size(self.max_volume),
            ParamKey::MigrationTimeout => format_duration(self.migration_timeout),
            ParamKey::BackupNewFiles => format_bool(self.backup_new_files?),
            ParamKey::CheckCopyStatusOnStartup => format_bool(self.check_copy_status_on_startup),
            ParamKey::CheckCopyStatusDelay => format_duration(self.check_copy_status_delay),
            ParamKey::NbThreads => self.nb_threads.to_string(),
            ParamKey::QueueSize => self.queue_size.to_string(),
            ParamKey::DbRequestLimit => self.db_request_limit.to_string(),
            ParamKey::PreMaintenanceWindow => format_duration(self.pre_maintenance_window),
            ParamKey::MaintMinMigrDelay => format_duration(self.maint_min_migr_delay),
        })
    }

    /// Copies one parameter from `other`.
    pub fn copy_field(&mut self, other: &MigrationParameters, key: ParamKey) {
        match key {
            ParamKey::RuntimeInterval => self.runtime_interval = other.runtime_interval,
            ParamKey::MaxCount => self.max_count = other.max_count,
            ParamKey::MaxVolume => self.max_volume = other.max_volume,
            ParamKey::MigrationTimeout => self.migration_timeout = other.migration_timeout,
            ParamKey::BackupNewFiles => self.backup_new_files = other.backup_new_files,
            ParamKey::CheckCopyStatusOnStartup => {
                self.check_copy_status_on_startup = other.check_copy_status_on_startup
            }
            ParamKey::CheckCopyStatusDelay => {
                self.check_copy_status_delay = other.check_copy_status_delay
            }
            ParamKey::NbThreads => self.nb_threads = other.nb_threads,
            ParamKey::QueueSize => self.queue_size = other.queue_size,
            ParamKey::DbRequestLimit => self.db_request_limit = other.db_request_limit,
            ParamKey::PreMaintenanceWindow => {
                self.pre_maintenance_window = other.pre_maintenance_window
            }
            ParamKey::MaintMinMigrDelay => self.maint_min_migr_delay = other.maint_min_migr_delay,
        }
    }

    /// The documented defaults as `(key, value)` pairs, absent keys skipped.
    pub fn describe_defaults(caps: Capabilities) -> Vec<(&'static str, String)> {
        let defaults = Self::defaults(caps);
        ParamKey::ALL
            .iter()
            .filter_map(|key| defaults.render(*key).map(|v| (key.name(), v)))
            .collect()
    }
}

impl Default for MigrationParameters {
    fn default() -> Self {
        Self::defaults(Capabilities::default())
    }
}
