//! Loading engine configuration from `~/.fixstream/config.ini`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::engine::{ConfigError, EngineConfig};
use crate::units::Distance;

impl EngineConfig {
    /// Load configuration from the default path (~/.fixstream/config.ini).
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults. Values are overlaid on
    /// the defaults through the validating setters.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        parse_ini(&ini)
    }
}

/// Get the path to the config directory (~/.fixstream).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fixstream")
}

/// Get the path to the config file (~/.fixstream/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Overlay an `Ini` document onto `EngineConfig::default()`.
fn parse_ini(ini: &Ini) -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();

    if let Some(section) = ini.section(Some("engine")) {
        if let Some(secs) = parse_key::<u64>(section, "engine", "command_timeout_secs")? {
            config.set_command_timeout(Duration::from_secs(secs))?;
        }
        if let Some(secs) = parse_key::<u64>(section, "engine", "read_timeout_secs")? {
            config.set_read_timeout(Duration::from_secs(secs))?;
        }
        if let Some(capacity) = parse_key::<usize>(section, "engine", "notification_capacity")? {
            config.set_notification_capacity(capacity)?;
        }
    }

    if let Some(section) = ini.section(Some("reconnect")) {
        if let Some(enabled) = parse_key::<bool>(section, "reconnect", "enabled")? {
            config.set_allow_automatic_reconnection(enabled);
        }
        if let Some(attempts) = parse_key::<i64>(section, "reconnect", "max_attempts")? {
            config.set_max_reconnection_attempts(attempts)?;
        }
        if let Some(ms) = parse_key::<u64>(section, "reconnect", "delay_ms")? {
            config.set_reconnect_delay(Duration::from_millis(ms))?;
        }
    }

    if let Some(section) = ini.section(Some("precision")) {
        if let Some(enabled) = parse_key::<bool>(section, "precision", "filter_enabled")? {
            config.set_filter_enabled(enabled);
        }
        if let Some(required) = parse_key::<bool>(section, "precision", "fix_required")? {
            config.set_fix_required(required);
        }
        if let Some(hdop) = parse_key::<f64>(section, "precision", "max_hdop")? {
            config.set_max_horizontal_dop(hdop)?;
        }
        if let Some(vdop) = parse_key::<f64>(section, "precision", "max_vdop")? {
            config.set_max_vertical_dop(vdop)?;
        }
        if let Some(meters) = parse_key::<f64>(section, "precision", "device_precision_m")? {
            config.set_device_precision(Distance::meters(meters))?;
        }
    }

    Ok(config)
}

/// Parse an optional key; an empty value counts as absent.
fn parse_key<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = section.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            section: section_name.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
            reason: format!("expected {}", std::any::type_name::<T>()),
        })
}
