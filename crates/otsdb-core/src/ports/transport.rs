//! Batch transport port.
//!
//! Implementations: `HttpTransport` (`/api/put`) and `TelnetTransport`
//! (line protocol) in the `otsdb-network` crate.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::batch::{Batch, BatchOutcome};

/// Sends one batch of points to the TSD
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Submit `batch` as a single write.
    ///
    /// `Ok` carries the per-batch success/failure counts, which may report a
    /// partial failure. `Err` means the write itself failed (connection
    /// refused, timeout); the caller treats that as every point failing.
    async fn submit(&self, batch: &Batch) -> Result<BatchOutcome, CoreError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
