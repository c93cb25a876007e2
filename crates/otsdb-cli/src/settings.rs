//! Config resolution and argument parsing helpers.
//!
//! Precedence: command-line flags > `OTSDB_*` environment > config file > defaults.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use otsdb_core::config::ClientConfig;
use otsdb_core::config_file;
use otsdb_core::models::data_point::{PointTimestamp, Tags};
use std::path::{Path, PathBuf};

pub const ENV_HOST: &str = "OTSDB_HOST";
pub const ENV_PORT: &str = "OTSDB_PORT";

/// Load the config file (if given) and apply environment and flag overrides.
///
/// Without `--config` the platform default file is used when it exists;
/// nothing is written to disk either way.
pub fn resolve_config(
    config_path: Option<&Path>,
    host: Option<&str>,
    port: Option<u16>,
) -> Result<ClientConfig> {
    resolve_with_env(config_path, host, port, |key| std::env::var(key).ok())
}

fn resolve_with_env<F>(
    config_path: Option<&Path>,
    host: Option<&str>,
    port: Option<u16>,
    env: F,
) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match config_path {
        Some(path) => config_file::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match config_file::default_path() {
            Ok(path) => config_file::load_or_default(&path)?,
            Err(_) => ClientConfig::default(),
        },
    };

    // a flag shadows its variable entirely, even a malformed one
    apply_env_overrides(&mut config, |key| match key {
        ENV_HOST if host.is_some() => None,
        ENV_PORT if port.is_some() => None,
        _ => env(key),
    })?;

    if let Some(host) = host {
        config.server.host = host.to_string();
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    config.validate()?;
    Ok(config)
}

/// The file `otsdb config` reads and writes: `--config`, else the platform default.
pub fn config_target(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_file::default_path()?),
    }
}

/// Apply `OTSDB_HOST` / `OTSDB_PORT` from `lookup`.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_HOST).filter(|h| !h.is_empty()) {
        config.server.host = host;
    }
    if let Some(port) = lookup(ENV_PORT).filter(|p| !p.is_empty()) {
        config.server.port = port
            .parse()
            .map_err(|_| anyhow!("{ENV_PORT} is not a valid port: {port}"))?;
    }
    Ok(())
}

/// Parse `k=v` tag arguments.
pub fn parse_tags(raw: &[String]) -> Result<Tags> {
    let mut tags = Tags::new();
    for item in raw {
        let Some((k, v)) = item.split_once('=') else {
            bail!("tag '{item}' is not in k=v form");
        };
        if tags.insert(k.to_string(), v.to_string()).is_some() {
            bail!("tag '{k}' given more than once");
        }
    }
    Ok(tags)
}

/// Parse a timestamp argument.
///
/// Accepts epoch seconds/milliseconds, RFC 3339 (`2024-01-01T00:00:00Z`) or a
/// local `YYYY-MM-DD HH:MM:SS`.
pub fn parse_timestamp(raw: &str) -> Result<PointTimestamp> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Ok(PointTimestamp::Epoch(epoch));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(PointTimestamp::DateTime(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(PointTimestamp::Local(naive));
        }
    }
    bail!("unrecognised timestamp '{raw}'")
}
