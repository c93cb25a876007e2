//! Subcommand handlers. Results are printed to stdout as pretty JSON.

use anyhow::{bail, Result};
use otsdb_core::config::ClientConfig;
use otsdb_core::config_file;
use otsdb_core::models::batch::SubmissionResult;
use otsdb_core::models::data_point::{PointTimestamp, Tags};
use otsdb_core::models::query::{QueryRequest, SuggestKind};
use otsdb_network::client::OpenTsdbClient;
use otsdb_network::telnet_client::TelnetWriter;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::lifecycle::CancelSignal;
use crate::settings;

/// Parsed `put` arguments
#[derive(Debug)]
pub struct PutInput {
    pub metric: String,
    pub values: Vec<f64>,
    pub timestamps: Option<Vec<PointTimestamp>>,
    pub tags: Tags,
}

impl PutInput {
    pub fn parse(
        metric: String,
        values: Vec<f64>,
        timestamps: &[String],
        tags: &[String],
    ) -> Result<Self> {
        let timestamps = if timestamps.is_empty() {
            None
        } else {
            if timestamps.len() != values.len() {
                bail!(
                    "{} timestamps given for {} values",
                    timestamps.len(),
                    values.len()
                );
            }
            Some(
                timestamps
                    .iter()
                    .map(|t| settings::parse_timestamp(t))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        Ok(Self {
            metric,
            values,
            timestamps,
            tags: settings::parse_tags(tags)?,
        })
    }
}

pub async fn put_http(config: ClientConfig, input: &PutInput) -> Result<SubmissionResult> {
    let client = OpenTsdbClient::new(config)?;
    let (signal, watcher) = watch_signals();

    let result = client
        .put_with_cancel(
            &input.metric,
            &input.values,
            input.timestamps.as_deref(),
            &input.tags,
            signal.subscribe(),
        )
        .await;
    watcher.abort();

    let result = result?;
    report(&result);
    Ok(result)
}

pub async fn put_telnet(config: &ClientConfig, input: &PutInput) -> Result<SubmissionResult> {
    let writer = TelnetWriter::new(config)?;
    let (signal, watcher) = watch_signals();

    let result = writer
        .put_with_cancel(
            &input.metric,
            &input.values,
            input.timestamps.as_deref(),
            &input.tags,
            signal.subscribe(),
        )
        .await;
    watcher.abort();
    if let Err(e) = writer.close().await {
        warn!("telnet close failed: {e}");
    }

    let result = result?;
    report(&result);
    Ok(result)
}

/// Cancel the write on SIGINT/SIGTERM; the put still returns its partial result.
fn watch_signals() -> (Arc<CancelSignal>, JoinHandle<()>) {
    let signal = Arc::new(CancelSignal::new());
    let watcher = tokio::spawn({
        let signal = signal.clone();
        async move { signal.wait_for_signal().await }
    });
    (signal, watcher)
}

fn report(result: &SubmissionResult) {
    if result.cancelled {
        warn!(
            "cancelled: {} of {} points written",
            result.success, result.points
        );
    } else if result.failed > 0 {
        warn!(
            "{} of {} points failed after {} rounds",
            result.failed, result.points, result.attempts
        );
    } else {
        info!("{} points written", result.points);
    }
}

pub async fn query(config: ClientConfig, request: &QueryRequest, union: bool) -> Result<()> {
    let client = OpenTsdbClient::new(config)?;
    if union {
        print_json(&client.query_union(request).await?)
    } else {
        print_json(&client.query_grouped(request).await?)
    }
}

pub async fn suggest(
    config: ClientConfig,
    kind: SuggestKind,
    prefix: &str,
    max: usize,
) -> Result<()> {
    let client = OpenTsdbClient::new(config)?;
    print_json(&client.suggest(kind, prefix, max).await?)
}

pub async fn version(config: ClientConfig) -> Result<()> {
    let client = OpenTsdbClient::new(config)?;
    print_json(&client.version().await?)
}

pub async fn aggregators(config: ClientConfig) -> Result<()> {
    let client = OpenTsdbClient::new(config)?;
    print_json(&client.aggregators().await?)
}

/// Write a default config to `path`, keeping any existing file unless `force`.
pub fn config_init(path: &Path, host: Option<&str>, port: Option<u16>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let mut config = ClientConfig::default();
    if let Some(host) = host {
        config.server.host = host.to_string();
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config_file::save(path, &config)?;
    println!("{}", path.display());
    Ok(())
}

/// Change one setting in the file at `path`, creating it from defaults if missing.
pub fn config_set(path: &Path, key: &str, value: &str) -> Result<()> {
    let current = config_file::load_or_default(path)?;
    let updated = config_file::set_value(&current, key, value)?;
    config_file::save(path, &updated)?;
    info!("{key} = {value} in {}", path.display());
    Ok(())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
