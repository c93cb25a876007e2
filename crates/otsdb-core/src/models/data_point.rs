//! Data point model.
//!
//! A single `(metric, timestamp, value, tags)` observation, plus the
//! timestamp input forms callers may hand to `put`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::CoreError;

/// Tag name → tag value. Ordered so serialized points are stable.
pub type Tags = BTreeMap<String, String>;

/// One observation as written to `/api/put` or the telnet interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub metric: String,
    /// Unix epoch in seconds or milliseconds
    pub timestamp: i64,
    pub value: f64,
    pub tags: Tags,
}

impl DataPoint {
    /// Encode as a telnet `put` command, newline terminated.
    pub fn to_put_line(&self) -> String {
        let mut line = format!("put {} {} {}", self.metric, self.timestamp, self.value);
        for (k, v) in &self.tags {
            let _ = write!(line, " {k}={v}");
        }
        line.push('\n');
        line
    }
}

/// Caller-supplied timestamp, resolved to an epoch integer at point construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointTimestamp {
    /// Epoch seconds or milliseconds, passed through unchanged
    Epoch(i64),
    /// Absolute instant, converted to epoch seconds
    DateTime(DateTime<Utc>),
    /// Wall-clock time in the local zone, converted to epoch seconds
    Local(NaiveDateTime),
}

impl PointTimestamp {
    pub fn resolve(&self) -> Result<i64, CoreError> {
        match self {
            PointTimestamp::Epoch(ts) => Ok(*ts),
            PointTimestamp::DateTime(dt) => Ok(dt.timestamp()),
            PointTimestamp::Local(naive) => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .ok_or_else(|| {
                    CoreError::validation(
                        "timestamps",
                        format!("{naive} does not exist in the local time zone"),
                    )
                }),
        }
    }
}

impl From<i64> for PointTimestamp {
    fn from(ts: i64) -> Self {
        PointTimestamp::Epoch(ts)
    }
}

impl From<DateTime<Utc>> for PointTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        PointTimestamp::DateTime(dt)
    }
}

impl From<NaiveDateTime> for PointTimestamp {
    fn from(naive: NaiveDateTime) -> Self {
        PointTimestamp::Local(naive)
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Metric names must be non-empty and contain no whitespace.
pub fn validate_metric(metric: &str) -> Result<(), CoreError> {
    if metric.is_empty() {
        return Err(CoreError::validation("metric", "must not be empty"));
    }
    if metric.chars().any(char::is_whitespace) {
        return Err(CoreError::validation(
            "metric",
            format!("'{metric}' contains whitespace"),
        ));
    }
    Ok(())
}

/// Tag keys and values must be non-empty and contain neither whitespace nor `=`.
pub fn validate_tags(tags: &Tags) -> Result<(), CoreError> {
    for (k, v) in tags {
        for part in [k, v] {
            if part.is_empty() || part.chars().any(|c| c.is_whitespace() || c == '=') {
                return Err(CoreError::validation(
                    "tags",
                    format!("invalid tag {k}={v}"),
                ));
            }
        }
    }
    Ok(())
}
