//! The polling loop: walks every registered source page by page and hands
//! each one to the worker pool.
//!
//! The dispatch send blocks while all workers are busy, which is what keeps
//! the scheduler from running ahead of the pool. Passes are additionally
//! spaced by a minimum interval so that fast pools do not hammer remote
//! endpoints.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::storage::{Source, Store, StoreError};

/// How a pass over the source set ended.
#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Completed { dispatched: usize },
    Cancelled,
    /// Every worker has exited; nothing can be dispatched any more.
    PoolClosed,
}

/// Remaining time to wait so that a pass which took `elapsed` is not
/// followed by the next one sooner than `min_interval` after its start.
pub(crate) fn throttle_delay(elapsed: Duration, min_interval: Duration) -> Duration {
    min_interval.saturating_sub(elapsed)
}

pub(crate) struct Scheduler<S> {
    pub store: S,
    /// Sources fetched per page; equal to the pool width.
    pub page_size: i64,
    pub min_cycle_interval: Duration,
    pub error_backoff: Duration,
    pub dispatch: mpsc::Sender<Source>,
    pub cancel: CancellationToken,
}

impl<S: Store> Scheduler<S> {
    pub async fn run(self) {
        tracing::debug!(page_size = self.page_size, "Scheduler started");

        while !self.cancel.is_cancelled() {
            let started = Instant::now();

            let delay = match self.run_cycle().await {
                Ok(CycleOutcome::Completed { dispatched }) => {
                    tracing::debug!(
                        dispatched = dispatched,
                        elapsed = ?started.elapsed(),
                        "Scheduler pass complete"
                    );
                    throttle_delay(started.elapsed(), self.min_cycle_interval)
                }
                Ok(CycleOutcome::Cancelled) => break,
                Ok(CycleOutcome::PoolClosed) => {
                    tracing::warn!("Worker pool closed, scheduler exiting");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff = ?self.error_backoff,
                        "Failed to list sources, aborting pass"
                    );
                    self.error_backoff
                        .max(throttle_delay(started.elapsed(), self.min_cycle_interval))
                }
            };

            if !self.sleep(delay).await {
                break;
            }
        }

        tracing::debug!("Scheduler stopped");
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, StoreError> {
        let count = self.store.count_sources().await?;
        let mut dispatched = 0;
        let mut offset = 0;

        while offset < count {
            if self.cancel.is_cancelled() {
                return Ok(CycleOutcome::Cancelled);
            }

            let page = self.store.list_sources(self.page_size, offset).await?;
            if page.is_empty() {
                // Sources removed since the count was taken
                break;
            }

            for source in page {
                if self.cancel.is_cancelled() {
                    return Ok(CycleOutcome::Cancelled);
                }

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(CycleOutcome::Cancelled),
                    sent = self.dispatch.send(source) => {
                        if sent.is_err() {
                            return Ok(CycleOutcome::PoolClosed);
                        }
                    }
                }
                dispatched += 1;
            }

            offset += self.page_size;
        }

        Ok(CycleOutcome::Completed { dispatched })
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
