//! Write-path models.
//!
//! Batches of points, the per-submission outcome reported by a transport,
//! and the accumulated result returned by `put`.

use serde::{Deserialize, Serialize};

use super::data_point::DataPoint;

/// Bounded group of points submitted as one transport call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Position in the partitioned sequence (0-based)
    pub index: usize,
    pub points: Vec<DataPoint>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// What a transport reports for one submitted batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// HTTP status, `None` for the telnet transport
    pub status: Option<u16>,
    pub success: usize,
    pub failed: usize,
    /// Per-point error messages, when the transport has them
    pub errors: Vec<String>,
}

impl BatchOutcome {
    /// Every point of a `len`-point batch accepted
    pub fn accepted(len: usize, status: Option<u16>) -> Self {
        Self {
            status,
            success: len,
            failed: 0,
            errors: Vec::new(),
        }
    }

    /// Every point of a `len`-point batch rejected
    pub fn rejected(len: usize, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status,
            success: 0,
            failed: len,
            errors: vec![error.into()],
        }
    }

    /// A batch with zero reported failures is retired from retry.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// OpenTSDB `/api/put?summary` response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PutSummary {
    #[serde(default)]
    pub success: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub errors: Vec<PutError>,
}

/// One rejected point in a `details` put response
#[derive(Debug, Clone, Deserialize)]
pub struct PutError {
    #[serde(default)]
    pub datapoint: serde_json::Value,
    #[serde(default)]
    pub error: String,
}

/// Outcome of one batch in one round, kept when details are requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: usize,
    /// 1-based round number
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub success: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Final accounting of a `put`. `success + failed == points` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub points: usize,
    pub success: usize,
    pub failed: usize,
    /// Rounds actually run
    pub attempts: u32,
    /// Sequence stopped by the cancellation signal
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<BatchReport>>,
}

impl SubmissionResult {
    /// Nothing to send
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Successful share of points, 100% for an empty submission
    pub fn success_rate(&self) -> f64 {
        if self.points == 0 {
            return 100.0;
        }
        100.0 * self.success as f64 / self.points as f64
    }
}
