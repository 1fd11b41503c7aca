use std::sync::RwLock;
use std::time::Duration;

use thiserror::Error;

use crate::params::MigrationParameters;

/// A planned maintenance of the namespace or the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start_ms: u64,
    pub end_ms: u64,
    pub reason: String,
}

impl MaintenanceWindow {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms >= self.start_ms && now_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),
    #[error("Window expired: {0}")]
    WindowExpired(String),
}

/// How the scheduler should behave given the maintenance calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// No maintenance in sight.
    Normal,
    /// Maintenance within the pre-maintenance window; dispatch proceeds.
    PreMaintenance { remaining: Duration },
    /// Maintenance too close (or running); skip this pass.
    Defer { remaining: Duration },
}

/// Operator-registered maintenance windows.
#[derive(Debug, Default)]
pub struct MaintenanceCalendar {
    windows: RwLock<Vec<MaintenanceWindow>>,
}

impl MaintenanceCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, window: MaintenanceWindow, now_ms: u64) -> Result<(), MaintenanceError> {
        if window.end_ms <= window.start_ms {
            return Err(MaintenanceError::InvalidWindow(format!(
                "end {} is not after start {}",
                window.end_ms, window.start_ms
            )));
        }
        if window.end_ms <= now_ms {
            return Err(MaintenanceError::WindowExpired(window.reason));
        }
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        windows.push(window);
        windows.sort_by_key(|w| w.start_ms);
        Ok(())
    }

    /// Drops windows that ended before `now_ms`. Returns how many were dropped.
    pub fn prune(&self, now_ms: u64) -> usize {
        let mut windows = self.windows.write().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|w| w.end_ms > now_ms);
        before - windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The window running at `now_ms`, or else the next one to start.
    pub fn next_boundary(&self, now_ms: u64) -> Option<MaintenanceWindow> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows
            .iter()
            .find(|w| w.is_active(now_ms))
            .or_else(|| windows.iter().filter(|w| w.start_ms > now_ms).min_by_key(|w| w.start_ms))
            .cloned()
    }

    pub fn pacing(&self, now_ms: u64, params: &MigrationParameters) -> Pacing {
        let Some(window) = self.next_boundary(now_ms) else {
            return Pacing::Normal;
        };
        if window.is_active(now_ms) {
            return Pacing::Defer {
                remaining: Duration::ZERO,
            };
        }
        let remaining = Duration::from_millis(window.start_ms - now_ms);
        if remaining < params.maint_min_migr_delay {
            Pacing::Defer { remaining }
        } else if remaining <= params.pre_maintenance_window {
            Pacing::PreMaintenance { remaining }
        } else {
            Pacing::Normal
        }
    }
}
