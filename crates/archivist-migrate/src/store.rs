//! Versioned parameter store with hot reload.
//!
//! The live parameters are published as an immutable [`ParamSnapshot`]
//! through a `watch` channel. A pass or a poll cycle takes one snapshot and
//! uses it throughout, so a reload never shows it a mix of old and new values.
//! Static parameters are frozen at first load: a reload that changes them is
//! logged and otherwise ignored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{ConfigWarning, PARAM_BLOCK};
use crate::error::ConfigResult;
use crate::params::{Capabilities, MigrationParameters, ParamKey};

/// One published version of the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSnapshot {
    /// Version, bumped by every reload that applied a change.
    pub version: u64,
    /// The parameters.
    pub params: MigrationParameters,
}

/// Receiver side of the parameter channel.
pub type ParamWatch = watch::Receiver<Arc<ParamSnapshot>>;

/// A parameter whose value differs between the live and the reloaded config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Parameter name.
    pub key: String,
    /// Live value, in literal form.
    pub old: String,
    /// Reloaded value, in literal form.
    pub new: String,
}

/// Outcome of a reload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Dynamic parameters that took effect.
    pub applied: Vec<FieldChange>,
    /// Static parameters that changed but were not applied.
    pub ignored: Vec<FieldChange>,
    /// Version of the live snapshot after the reload.
    pub version: u64,
}

impl ReloadReport {
    /// Whether the reload changed nothing at all.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.ignored.is_empty()
    }
}

/// Owner of the live migration parameters.
pub struct ConfigStore {
    caps: Capabilities,
    sender: watch::Sender<Arc<ParamSnapshot>>,
}

impl ConfigStore {
    /// Publishes the initial parameters as version 1.
    pub fn new(params: MigrationParameters, caps: Capabilities) -> ConfigResult<Self> {
        params.validate()?;
        let (sender, _) = watch::channel(Arc::new(ParamSnapshot { version: 1, params }));
        Ok(Self { caps, sender })
    }

    /// Loads the initial parameters from a TOML document.
    pub fn from_toml_str(text: &str, caps: Capabilities) -> ConfigResult<(Self, Vec<ConfigWarning>)> {
        let loaded = MigrationParameters::from_toml_str(text, caps)?;
        Ok((Self::new(loaded.params, caps)?, loaded.warnings))
    }

    /// Capabilities resolved at first load.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ParamSnapshot> {
        self.sender.borrow().clone()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> ParamWatch {
        self.sender.subscribe()
    }

    /// Diffs `new` against the live snapshot and publishes the dynamic changes.
    pub fn reload(&self, new: MigrationParameters) -> ConfigResult<ReloadReport> {
        new.validate()?;

        let current = self.snapshot();
        let mut next = current.params.clone();
        let mut report = ReloadReport::default();

        for key in ParamKey::ALL {
            let old_value = current.params.render(key);
            let new_value = new.render(key);
            if old_value == new_value {
                continue;
            }
            let change = FieldChange {
                key: key.name().to_string(),
                old: old_value.unwrap_or_default(),
                new: new_value.unwrap_or_default(),
            };
            if key.is_static() {
                warn!(
                    "{}::{} changed in config file, but cannot be modified dynamically ({} -> {})",
                    PARAM_BLOCK, change.key, change.old, change.new
                );
                report.ignored.push(change);
            } else {
                info!(
                    "{}::{} updated: {} -> {}",
                    PARAM_BLOCK, change.key, change.old, change.new
                );
                next.copy_field(&new, key);
                report.applied.push(change);
            }
        }

        if report.applied.is_empty() {
            report.version = current.version;
        } else {
            report.version = current.version + 1;
            self.sender.send_replace(Arc::new(ParamSnapshot {
                version: report.version,
                params: next,
            }));
        }
        Ok(report)
    }

    /// Reloads from a TOML document; a validation failure leaves the live
    /// snapshot untouched.
    pub fn reload_toml_str(&self, text: &str) -> ConfigResult<(ReloadReport, Vec<ConfigWarning>)> {
        let loaded = MigrationParameters::from_toml_str(text, self.caps)?;
        let report = self.reload(loaded.params)?;
        Ok((report, loaded.warnings))
    }
}
