//! Loading of the `migration_parameters` block.
//!
//! No parameter is mandatory: values absent from the block keep their
//! documented defaults. Unknown keys and deprecated keys are reported as
//! warnings and never fail the load.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toml::{Table, Value};
use tracing::{error, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::literal::{parse_bool, parse_duration, parse_size};
use crate::params::{Capabilities, MigrationParameters, ParamKey};

/// Name of the parameters block (matched case-insensitively).
pub const PARAM_BLOCK: &str = "migration_parameters";

/// Keys that are still accepted but no longer have any effect.
const DEPRECATED_KEYS: &[(&str, &str)] = &[(
    "simulation_mode",
    "use the dry-run option of the embedding tool instead",
)];

/// Non-fatal findings of a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigWarning {
    /// Key not recognized in the parameters block.
    UnknownKey(String),
    /// Key recognized but deprecated; it was ignored.
    Deprecated {
        /// The deprecated key.
        key: String,
        /// What to use instead.
        hint: String,
    },
}

/// Result of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    /// Validated parameters.
    pub params: MigrationParameters,
    /// Warnings raised while reading the block.
    pub warnings: Vec<ConfigWarning>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Positivity {
    NonNegative,
    Strict,
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn malformed(key: ParamKey, kind: &'static str, value: &Value) -> ConfigError {
    ConfigError::Malformed {
        key: key.name().to_string(),
        kind,
        literal: literal_text(value),
    }
}

fn check_positive(key: ParamKey, raw: i128, positivity: Positivity) -> ConfigResult<()> {
    if raw < 0 {
        return Err(ConfigError::validation(key.name(), "must not be negative"));
    }
    if raw == 0 && positivity == Positivity::Strict {
        return Err(ConfigError::validation(key.name(), "must be strictly positive"));
    }
    Ok(())
}

fn get_duration(
    block: &Table,
    key: ParamKey,
    positivity: Positivity,
) -> ConfigResult<Option<Duration>> {
    let Some(value) = block.get(key.name()) else {
        return Ok(None);
    };
    let duration = match value {
        Value::Integer(secs) => {
            check_positive(key, i128::from(*secs), positivity)?;
            Duration::from_secs(*secs as u64)
        }
        Value::String(text) => {
            if text.trim_start().starts_with('-') {
                return Err(ConfigError::validation(key.name(), "must not be negative"));
            }
            parse_duration(text).ok_or_else(|| malformed(key, "duration", value))?
        }
        other => return Err(malformed(key, "duration", other)),
    };
    check_positive(key, i128::from(duration.as_secs()), positivity)?;
    Ok(Some(duration))
}

fn get_int(block: &Table, key: ParamKey, positivity: Positivity) -> ConfigResult<Option<u64>> {
    let Some(value) = block.get(key.name()) else {
        return Ok(None);
    };
    let raw: i128 = match value {
        Value::Integer(n) => i128::from(*n),
        Value::String(text) => text
            .trim()
            .parse::<i128>()
            .map_err(|_| malformed(key, "integer", value))?,
        other => return Err(malformed(key, "integer", other)),
    };
    check_positive(key, raw, positivity)?;
    u64::try_from(raw)
        .map(Some)
        .map_err(|_| ConfigError::validation(key.name(), "value too large"))
}

fn get_usize(block: &Table, key: ParamKey, positivity: Positivity) -> ConfigResult<Option<usize>> {
    get_int(block, key, positivity)?
        .map(|n| usize::try_from(n).map_err(|_| ConfigError::validation(key.name(), "value too large")))
        .transpose()
}

fn get_size(block: &Table, key: ParamKey) -> ConfigResult<Option<u64>> {
    let Some(value) = block.get(key.name()) else {
        return Ok(None);
    };
    match value {
        Value::Integer(n) => {
            check_positive(key, i128::from(*n), Positivity::NonNegative)?;
            Ok(Some(*n as u64))
        }
        Value::String(text) => {
            if text.trim_start().starts_with('-') {
                return Err(ConfigError::validation(key.name(), "must not be negative"));
            }
            parse_size(text)
                .map(Some)
                .ok_or_else(|| malformed(key, "size", value))
        }
        other => Err(malformed(key, "size", other)),
    }
}

fn get_bool(block: &Table, key: ParamKey) -> ConfigResult<Option<bool>> {
    let Some(value) = block.get(key.name()) else {
        return Ok(None);
    };
    match value {
        Value::Boolean(b) => Ok(Some(*b)),
        Value::String(text) => parse_bool(text)
            .map(Some)
            .ok_or_else(|| malformed(key, "boolean", value)),
        other => Err(malformed(key, "boolean", other)),
    }
}

impl MigrationParameters {
    /// Builds parameters from the raw parameters block.
    ///
    /// Starts from the documented defaults, overrides every key present in
    /// `block`, then validates the result.
    pub fn load(block: &Table, caps: Capabilities) -> ConfigResult<LoadedConfig> {
        use Positivity::{NonNegative, Strict};

        let mut p = MigrationParameters::defaults(caps);
        let mut warnings = Vec::new();

        if let Some(v) = get_duration(block, ParamKey::RuntimeInterval, Strict)? {
            p.runtime_interval = v;
        }
        if let Some(v) = get_int(block, ParamKey::MaxCount, NonNegative)? {
            p.max_count = v;
        }
        if let Some(v) = get_size(block, ParamKey::MaxVolume)? {
            p.max_volume = v;
        }
        if let Some(v) = get_duration(block, ParamKey::MigrationTimeout, Strict)? {
            p.migration_timeout = v;
        }
        if caps.backup {
            if let Some(v) = get_bool(block, ParamKey::BackupNewFiles)? {
                p.backup_new_files = Some(v);
            }
        }
        if let Some(v) = get_bool(block, ParamKey::CheckCopyStatusOnStartup)? {
            p.check_copy_status_on_startup = v;
        }
        if let Some(v) = get_duration(block, ParamKey::CheckCopyStatusDelay, Strict)? {
            p.check_copy_status_delay = v;
        }
        if let Some(v) = get_usize(block, ParamKey::NbThreads, Strict)? {
            p.nb_threads = v;
        }
        if let Some(v) = get_usize(block, ParamKey::QueueSize, Strict)? {
            p.queue_size = v;
        }
        if let Some(v) = get_usize(block, ParamKey::DbRequestLimit, NonNegative)? {
            p.db_request_limit = v;
        }
        if let Some(v) = get_duration(block, ParamKey::PreMaintenanceWindow, NonNegative)? {
            p.pre_maintenance_window = v;
        }
        if let Some(v) = get_duration(block, ParamKey::MaintMinMigrDelay, NonNegative)? {
            p.maint_min_migr_delay = v;
        }

        for key in block.keys() {
            if let Some((_, hint)) = DEPRECATED_KEYS.iter().find(|(name, _)| *name == key.as_str()) {
                error!(key = %key, "deprecated parameter '{}' ignored: {}", key, hint);
                warnings.push(ConfigWarning::Deprecated {
                    key: key.clone(),
                    hint: hint.to_string(),
                });
                continue;
            }
            let known = match ParamKey::from_name(key) {
                Some(ParamKey::BackupNewFiles) => caps.backup,
                Some(_) => true,
                None => false,
            };
            if !known {
                warn!(key = %key, "unknown parameter '{}' in block {}", key, PARAM_BLOCK);
                warnings.push(ConfigWarning::UnknownKey(key.clone()));
            }
        }

        p.validate()?;
        Ok(LoadedConfig { params: p, warnings })
    }

    /// Reads the parameters block from a TOML document.
    pub fn from_toml_str(text: &str, caps: Capabilities) -> ConfigResult<LoadedConfig> {
        let document: Table = text
            .parse::<Table>()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        let block = document
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(PARAM_BLOCK))
            .map(|(_, value)| value);

        match block {
            None => MigrationParameters::load(&Table::new(), caps),
            Some(Value::Table(table)) => MigrationParameters::load(table, caps),
            Some(_) => Err(ConfigError::validation(
                PARAM_BLOCK,
                "a block is expected for this item",
            )),
        }
    }

    /// Reads the parameters block from a TOML file.
    pub fn from_file(path: &Path, caps: Capabilities) -> ConfigResult<LoadedConfig> {
        let contents = std::fs::read_to_string(path)?;
        MigrationParameters::from_toml_str(&contents, caps)
    }
}
