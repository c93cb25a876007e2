//! Read-path models.
//!
//! `/api/query` request parameters and the two result shapes callers choose
//! between (one entry per series, or all series merged into one), plus the
//! small response types of the metadata endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::data_point::Tags;
use crate::error::CoreError;

/// Epoch values at or above this are treated as milliseconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// `/api/query` request for a single metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub metric: String,
    /// `None` uses the configured default aggregator
    pub aggregator: Option<String>,
    pub tags: Tags,
    /// `None` uses the configured default start (e.g. `1h-ago`)
    pub start: Option<String>,
    pub end: Option<String>,
    pub show_summary: bool,
}

impl QueryRequest {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Default::default()
        }
    }

    pub fn with_aggregator(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregator = Some(aggregator.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn with_summary(mut self, show_summary: bool) -> Self {
        self.show_summary = show_summary;
        self
    }

    /// The `m` parameter: `<aggregator>:<metric>{k=v,...}`
    pub fn metric_param(&self, aggregator: &str) -> String {
        let mut m = format!("{aggregator}:{}", self.metric);
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
            m.push('{');
            m.push_str(&tags.join(","));
            m.push('}');
        }
        m
    }

    /// Query-string pairs, with `default_aggregator`/`default_start` filling gaps
    pub fn query_pairs(
        &self,
        default_aggregator: &str,
        default_start: &str,
    ) -> Vec<(&'static str, String)> {
        let aggregator = self.aggregator.as_deref().unwrap_or(default_aggregator);
        let mut pairs = vec![
            ("m", self.metric_param(aggregator)),
            (
                "start",
                self.start.as_deref().unwrap_or(default_start).to_string(),
            ),
        ];
        if let Some(end) = &self.end {
            pairs.push(("end", end.clone()));
        }
        if self.show_summary {
            pairs.push(("show_summary", "true".to_string()));
        }
        pairs
    }
}

/// One series as returned by `/api/query`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSeries {
    pub metric: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub aggregate_tags: Vec<String>,
    /// Epoch (as a string key) → value
    #[serde(default)]
    pub dps: BTreeMap<String, f64>,
}

impl RawSeries {
    /// Points sorted by numeric timestamp. Keys that are not integers are skipped.
    pub fn sorted_points(&self) -> Vec<(i64, f64)> {
        let mut points: Vec<(i64, f64)> = self
            .dps
            .iter()
            .filter_map(|(ts, v)| ts.parse::<i64>().ok().map(|ts| (ts, *v)))
            .collect();
        points.sort_by_key(|(ts, _)| *ts);
        points
    }
}

/// Parsed `/api/query` response: the series plus the optional `statsSummary` entry
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub series: Vec<RawSeries>,
    pub summary: Option<serde_json::Value>,
}

impl QueryResponse {
    pub fn parse(body: &str) -> Result<Self, CoreError> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(body)?;
        let mut response = QueryResponse::default();
        for entry in entries {
            if let Some(summary) = entry.get("statsSummary") {
                response.summary = Some(summary.clone());
            } else if entry.get("metric").is_some() {
                response.series.push(serde_json::from_value(entry)?);
            }
        }
        Ok(response)
    }

    /// One result per series
    pub fn into_grouped(self) -> GroupedResult {
        let results = self
            .series
            .into_iter()
            .map(|s| SeriesResult {
                points: s.sorted_points(),
                metric: s.metric,
                tags: s.tags,
                aggregate_tags: s.aggregate_tags,
            })
            .collect();
        GroupedResult {
            results,
            summary: self.summary,
        }
    }

    /// All series merged by timestamp; on collisions the later series wins.
    pub fn into_union(self) -> UnionResult {
        let mut merged: BTreeMap<i64, f64> = BTreeMap::new();
        for series in &self.series {
            merged.extend(series.sorted_points());
        }
        UnionResult {
            points: merged.into_iter().collect(),
            summary: self.summary,
        }
    }
}

/// A single series with its points sorted by timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResult {
    pub metric: String,
    pub tags: Tags,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregate_tags: Vec<String>,
    pub points: Vec<(i64, f64)>,
}

impl SeriesResult {
    pub fn columns(&self) -> PointColumns {
        PointColumns::from_points(&self.points)
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.columns().timestamps
    }

    pub fn values(&self) -> Vec<f64> {
        self.columns().values
    }

    pub fn datetimes(&self) -> Vec<DateTime<Utc>> {
        self.columns().datetimes
    }
}

/// Result grouped by series
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedResult {
    pub results: Vec<SeriesResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

/// Points of every returned series in one timeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnionResult {
    pub points: Vec<(i64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl UnionResult {
    pub fn columns(&self) -> PointColumns {
        PointColumns::from_points(&self.points)
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.columns().timestamps
    }

    pub fn values(&self) -> Vec<f64> {
        self.columns().values
    }

    pub fn datetimes(&self) -> Vec<DateTime<Utc>> {
        self.columns().datetimes
    }
}

/// `(timestamp, value)` pairs split into parallel columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointColumns {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
    /// Only timestamps chrono can represent; may be shorter than `timestamps`.
    pub datetimes: Vec<DateTime<Utc>>,
}

impl PointColumns {
    pub fn from_points(points: &[(i64, f64)]) -> Self {
        let mut columns = PointColumns {
            timestamps: Vec::with_capacity(points.len()),
            values: Vec::with_capacity(points.len()),
            datetimes: Vec::with_capacity(points.len()),
        };
        for &(ts, value) in points {
            columns.timestamps.push(ts);
            columns.values.push(value);
            columns.datetimes.extend(epoch_to_datetime(ts));
        }
        columns
    }
}

/// Convert an epoch in seconds or milliseconds to a UTC instant.
pub fn epoch_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts.abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    }
}

/// `/api/suggest` lookup type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestKind {
    #[default]
    Metrics,
    Tagk,
    Tagv,
}

impl SuggestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestKind::Metrics => "metrics",
            SuggestKind::Tagk => "tagk",
            SuggestKind::Tagv => "tagv",
        }
    }
}

impl std::str::FromStr for SuggestKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metrics" => Ok(SuggestKind::Metrics),
            "tagk" => Ok(SuggestKind::Tagk),
            "tagv" => Ok(SuggestKind::Tagv),
            other => Err(CoreError::validation(
                "type",
                format!("'{other}' is not one of metrics, tagk, tagv"),
            )),
        }
    }
}

/// One row of `/api/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    pub metric: String,
    pub timestamp: i64,
    #[serde(deserialize_with = "number_or_string")]
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
}

/// The TSD reports stat values as strings; accept both forms.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
