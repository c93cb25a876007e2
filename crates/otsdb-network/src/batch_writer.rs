//! Batch writer.
//!
//! Resolves caller input (values, optional timestamps, shared tags) into data
//! points and partitions them, in order, into batches of at most `batch_size`.
//! Performs no I/O.

use otsdb_core::error::CoreError;
use otsdb_core::models::batch::Batch;
use otsdb_core::models::data_point::{
    now_millis, validate_metric, validate_tags, DataPoint, PointTimestamp, Tags,
};
use tracing::debug;

/// Partitions point series into request-sized batches
#[derive(Debug, Clone, Copy)]
pub struct BatchWriter {
    batch_size: usize,
}

impl BatchWriter {
    /// `batch_size` must be greater than zero.
    pub fn new(batch_size: usize) -> Result<Self, CoreError> {
        if batch_size == 0 {
            return Err(CoreError::validation("batch_size", "must be greater than 0"));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build points for `metric` and split them into batches.
    ///
    /// Without timestamps (or with an empty list) each point is stamped with
    /// the current time in milliseconds when it is built.
    pub fn batches(
        &self,
        metric: &str,
        values: &[f64],
        timestamps: Option<&[PointTimestamp]>,
        tags: &Tags,
    ) -> Result<Vec<Batch>, CoreError> {
        let points = build_points(metric, values, timestamps, tags)?;
        Ok(self.partition(points))
    }

    /// Split `points` into batches, preserving order. The last batch may be short.
    pub fn partition(&self, points: Vec<DataPoint>) -> Vec<Batch> {
        let total = points.len();
        let mut batches = Vec::with_capacity(total.div_ceil(self.batch_size));
        let mut current = Vec::with_capacity(self.batch_size.min(total));

        for point in points {
            current.push(point);
            if current.len() == self.batch_size {
                let index = batches.len();
                batches.push(Batch {
                    index,
                    points: std::mem::take(&mut current),
                });
            }
        }
        if !current.is_empty() {
            let index = batches.len();
            batches.push(Batch {
                index,
                points: current,
            });
        }

        debug!(
            "{total} points partitioned into {} batches (batch_size={})",
            batches.len(),
            self.batch_size
        );
        batches
    }
}

/// Resolve caller input into data points, validating before any I/O.
pub fn build_points(
    metric: &str,
    values: &[f64],
    timestamps: Option<&[PointTimestamp]>,
    tags: &Tags,
) -> Result<Vec<DataPoint>, CoreError> {
    validate_metric(metric)?;
    validate_tags(tags)?;

    let timestamps = timestamps.filter(|ts| !ts.is_empty());
    if let Some(ts) = timestamps {
        if ts.len() != values.len() {
            return Err(CoreError::validation(
                "timestamps",
                format!(
                    "{} timestamps do not fit {} values",
                    ts.len(),
                    values.len()
                ),
            ));
        }
    }

    values
        .iter()
        .enumerate()
        .map(|(n, value)| {
            let timestamp = match timestamps {
                Some(ts) => ts[n].resolve()?,
                None => now_millis(),
            };
            Ok(DataPoint {
                metric: metric.to_string(),
                timestamp,
                value: *value,
                tags: tags.clone(),
            })
        })
        .collect()
}
