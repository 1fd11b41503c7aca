#![warn(missing_docs)]

//! Archivist migration policy: parameters and hot reload, maintenance pacing,
//! the migration worker pool and scheduler, and the copy-status poller.

pub mod config;
pub mod error;
pub mod literal;
#[allow(missing_docs)]
pub mod maintenance;
pub mod params;
pub mod pass;
pub mod poller;
pub mod pool;
pub mod scheduler;
pub mod store;

pub use config::{ConfigWarning, LoadedConfig, PARAM_BLOCK};
pub use error::{ConfigError, ConfigResult, MigrateError, MigrateResult};
pub use maintenance::{MaintenanceCalendar, MaintenanceError, MaintenanceWindow, Pacing};
pub use params::{AddressingMode, Capabilities, MigrationParameters, ParamKey};
pub use pass::{ActivityClock, MigrationPass, PassTracker, WaitOutcome};
pub use poller::{CopyStatusPoller, PollReport};
pub use pool::{Job, PoolHandle, PoolStats, WorkerPool};
pub use scheduler::{
    CandidateSource, MigrationScheduler, PassOutcome, PassReport, SchedulerState, SelectionContext,
};
pub use store::{ConfigStore, FieldChange, ParamSnapshot, ParamWatch, ReloadReport};
