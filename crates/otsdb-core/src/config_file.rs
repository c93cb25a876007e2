//! `config.json` on disk.
//!
//! The file holds a serialized [`ClientConfig`]. Missing fields take their
//! defaults, so a file may set only what differs.

use crate::config::ClientConfig;
use crate::error::CoreError;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FILE_NAME: &str = "config.json";
const APP_DIR: &str = "otsdb";

/// Platform location of the config file.
///
/// Linux: `$XDG_CONFIG_HOME/otsdb/config.json`, else `~/.config/otsdb/config.json`.
/// macOS: `~/Library/Application Support/otsdb/config.json`.
/// Windows: `%APPDATA%\otsdb\config.json`.
pub fn default_path() -> Result<PathBuf, CoreError> {
    default_path_from(|key| std::env::var_os(key))
}

fn default_path_from<F>(env: F) -> Result<PathBuf, CoreError>
where
    F: Fn(&str) -> Option<OsString>,
{
    let base = if cfg!(target_os = "windows") {
        env("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        env("HOME").map(|home| PathBuf::from(home).join("Library/Application Support"))
    } else {
        env("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))
    };
    base.map(|dir| dir.join(APP_DIR).join(FILE_NAME))
        .ok_or_else(|| CoreError::Config("no home or config directory in the environment".into()))
}

/// Read and validate a config file.
pub fn load(path: &Path) -> Result<ClientConfig, CoreError> {
    let content = fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("failed to read {}: {e}", path.display())))?;
    let config: ClientConfig = serde_json::from_str(&content)
        .map_err(|e| CoreError::Config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    debug!("config loaded: {}", path.display());
    Ok(config)
}

/// [`load`], or the defaults when `path` does not exist.
pub fn load_or_default(path: &Path) -> Result<ClientConfig, CoreError> {
    if path.exists() {
        load(path)
    } else {
        Ok(ClientConfig::default())
    }
}

/// Validate and write `config` as pretty JSON, creating parent directories.
///
/// Written to a sibling temp file first, then renamed over `path`.
pub fn save(path: &Path, config: &ClientConfig) -> Result<(), CoreError> {
    config.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    info!("config written: {}", path.display());
    Ok(())
}

/// Return a copy of `config` with the dotted `key` (e.g. `write.batch_size`)
/// set to `raw`.
///
/// String settings take `raw` verbatim; other settings parse it as JSON
/// (`30`, `true`). The result is validated.
pub fn set_value(config: &ClientConfig, key: &str, raw: &str) -> Result<ClientConfig, CoreError> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| CoreError::validation("key", format!("'{key}' is not section.field")))?;

    let mut doc = serde_json::to_value(config)?;
    let slot = doc
        .get_mut(section)
        .and_then(|s| s.get_mut(field))
        .ok_or_else(|| CoreError::validation("key", format!("unknown setting '{key}'")))?;

    let replacement = if slot.is_string() {
        Value::String(raw.to_string())
    } else {
        serde_json::from_str(raw)
            .map_err(|_| CoreError::validation(key, format!("'{raw}' is not a valid value")))?
    };
    *slot = replacement;

    let updated: ClientConfig = serde_json::from_value(doc)
        .map_err(|e| CoreError::validation(key, e.to_string()))?;
    updated.validate()?;
    Ok(updated)
}
