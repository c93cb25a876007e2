//! Retry controller.
//!
//! Drives a set of batches to completion over a [`BatchTransport`]:
//!
//! - **Pending**: batches waiting for the next round
//! - **Submitted**: a round in flight; every pending batch is dispatched concurrently
//! - **Done**: nothing pending, attempt budget spent, or cancelled between rounds
//!
//! Rounds are strictly sequential. A batch whose outcome reports any failed
//! point goes back to pending and is resubmitted whole; batches reporting zero
//! failures are retired. Transport errors never escape: they count as a batch
//! with every point failed, and a non-transient one (see
//! [`is_retryable`](otsdb_core::error::CoreError::is_retryable)) retires the
//! batch as failed.

use futures::future::join_all;
use otsdb_core::config::WriteConfig;
use otsdb_core::models::batch::{Batch, BatchOutcome, BatchReport, SubmissionResult};
use otsdb_core::ports::transport::BatchTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Attempt budget and pacing between rounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum rounds; 0 submits nothing and reports every point failed
    pub max_attempts: u32,
    /// Delay before round 2, doubled for each later round
    pub backoff: Duration,
    pub max_backoff: Duration,
    /// Keep a [`BatchReport`] per submission in the result
    pub keep_details: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&WriteConfig::default())
    }
}

impl From<&WriteConfig> for RetryPolicy {
    fn from(config: &WriteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.retry_backoff(),
            max_backoff: config.max_backoff(),
            keep_details: config.details,
        }
    }
}

/// A batch still owed to the TSD
struct PendingBatch {
    batch: Batch,
    /// Failure count reported by the latest round, `None` before the first
    last_failed: Option<usize>,
}

impl PendingBatch {
    fn failed_points(&self) -> usize {
        self.last_failed.unwrap_or(self.batch.len())
    }
}

/// Per-call mutable state; dropped once the result is built
struct AttemptState {
    pending: Vec<PendingBatch>,
    attempt: u32,
}

pub struct RetryController<T: BatchTransport + ?Sized> {
    transport: Arc<T>,
    policy: RetryPolicy,
}

impl<T: BatchTransport + ?Sized> RetryController<T> {
    pub fn new(transport: Arc<T>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit `batches` until all succeed or the budget runs out.
    pub async fn run(&self, batches: Vec<Batch>) -> SubmissionResult {
        self.run_inner(batches, None).await
    }

    /// Like [`run`](Self::run), but stops between rounds once `cancel` reads `true`.
    /// Points of batches still pending at that moment are reported failed.
    pub async fn run_with_cancel(
        &self,
        batches: Vec<Batch>,
        cancel: watch::Receiver<bool>,
    ) -> SubmissionResult {
        self.run_inner(batches, Some(cancel)).await
    }

    async fn run_inner(
        &self,
        batches: Vec<Batch>,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> SubmissionResult {
        let points: usize = batches.iter().map(Batch::len).sum();
        if points == 0 {
            return SubmissionResult::empty();
        }

        let mut state = AttemptState {
            pending: batches
                .into_iter()
                .filter(|b| !b.is_empty())
                .map(|batch| PendingBatch {
                    batch,
                    last_failed: None,
                })
                .collect(),
            attempt: 0,
        };
        let mut details = self.policy.keep_details.then(Vec::new);
        let mut delay = self.policy.backoff.min(self.policy.max_backoff);
        let mut abandoned = 0usize;
        let mut cancelled = false;

        while !state.pending.is_empty() && state.attempt < self.policy.max_attempts {
            if state.attempt > 0 && !delay.is_zero() {
                self.pause(delay, cancel.as_mut()).await;
                delay = (delay * 2).min(self.policy.max_backoff);
            }
            if is_cancelled(cancel.as_ref()) {
                info!(
                    "{} submission cancelled after {} rounds, {} batches pending",
                    self.transport.name(),
                    state.attempt,
                    state.pending.len()
                );
                cancelled = true;
                break;
            }

            state.attempt += 1;
            let attempt = state.attempt;
            debug!(
                "round {attempt}/{}: submitting {} batches via {}",
                self.policy.max_attempts,
                state.pending.len(),
                self.transport.name()
            );

            let submissions = join_all(
                state
                    .pending
                    .iter()
                    .map(|p| self.submit_one(&p.batch, attempt)),
            )
            .await;

            let mut still_pending = Vec::new();
            for (mut pending, (outcome, retryable)) in state.pending.drain(..).zip(submissions) {
                if let Some(details) = details.as_mut() {
                    details.push(BatchReport {
                        batch: pending.batch.index,
                        attempt,
                        status: outcome.status,
                        success: outcome.success,
                        failed: outcome.failed,
                        errors: outcome.errors.clone(),
                    });
                }
                if outcome.is_complete() {
                    continue;
                }
                if !retryable {
                    abandoned += pending.batch.len();
                    continue;
                }
                pending.last_failed = Some(outcome.failed.min(pending.batch.len()));
                still_pending.push(pending);
            }
            state.pending = still_pending;
        }

        let still_failing: usize = if cancelled {
            state.pending.iter().map(|p| p.batch.len()).sum()
        } else {
            state.pending.iter().map(PendingBatch::failed_points).sum()
        };
        let failed = still_failing + abandoned;

        if failed > 0 && !cancelled {
            warn!(
                "{failed} of {points} points still failing after {} rounds",
                state.attempt
            );
        } else if failed == 0 {
            debug!("{points} points written in {} rounds", state.attempt);
        }

        SubmissionResult {
            points,
            success: points - failed,
            failed,
            attempts: state.attempt,
            cancelled,
            details,
        }
    }

    /// Submit one batch; the flag is false when resending cannot help.
    async fn submit_one(&self, batch: &Batch, attempt: u32) -> (BatchOutcome, bool) {
        match self.transport.submit(batch).await {
            Ok(outcome) => {
                if !outcome.is_complete() {
                    warn!(
                        "batch {} (round {attempt}): {} of {} points failed",
                        batch.index,
                        outcome.failed,
                        batch.len()
                    );
                }
                (outcome, true)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if retryable {
                    warn!("batch {} (round {attempt}) submission failed: {e}", batch.index);
                } else {
                    error!("batch {} (round {attempt}) failed, not retrying: {e}", batch.index);
                }
                (BatchOutcome::rejected(batch.len(), None, e.to_string()), retryable)
            }
        }
    }

    /// Sleep between rounds, waking early if cancellation arrives.
    async fn pause(&self, delay: Duration, cancel: Option<&mut watch::Receiver<bool>>) {
        match cancel {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(rx) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Resolves once the flag is set; never resolves if the sender is gone.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
