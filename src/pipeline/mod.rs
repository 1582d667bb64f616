//! The ingestion pipeline.
//!
//! ```text
//! Scheduler --dispatch--> Worker x N --items/cursors--> Publisher --> Store
//! ```
//!
//! - [`scheduler`] - paginates the source set and feeds the dispatch queue
//! - [`pool`] - fetch/parse workers that select new items per source
//! - [`publisher`] - the single writer, committing batches transactionally
//! - [`registration`] - feed probe and source registration
//! - [`watermarks`] - advances emitted but not committed yet
//!
//! [`Aggregator`] owns the lifecycle: it spawns every task on
//! [`start`](Aggregator::start) and drains them on [`stop`](Aggregator::stop).

mod pool;
mod publisher;
mod registration;
mod scheduler;
mod watermarks;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::feed::{FeedFetcher, FetchError};
use crate::storage::Store;

pub use pool::{extract_new_items, resolve_timestamp, Extraction};
pub use registration::{probe, register_source, Registration, RegistrationError};

use pool::spawn_workers;
use publisher::Publisher;
use scheduler::Scheduler;
use watermarks::Watermarks;

struct Running {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Lifecycle controller for the scheduler, the worker pool and the publisher.
pub struct Aggregator<S, F> {
    config: PipelineConfig,
    store: S,
    fetcher: Arc<F>,
    running: Option<Running>,
}

impl<S: Store, F: FeedFetcher> Aggregator<S, F> {
    pub fn new(config: PipelineConfig, store: S, fetcher: F) -> Self {
        Self {
            config,
            store,
            fetcher: Arc::new(fetcher),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the publisher, the workers and the scheduler.
    ///
    /// Must be called from within a tokio runtime. Calling it again while
    /// running does nothing.
    pub fn start(&mut self) {
        if self.running.is_some() {
            tracing::warn!("Aggregator already running");
            return;
        }

        let cancel = CancellationToken::new();
        let threads = self.config.threads();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(1);
        let (item_tx, item_rx) = mpsc::channel(1);
        let (cursor_tx, cursor_rx) = mpsc::channel(1);
        let watermarks = Watermarks::default();

        let mut tasks = Vec::with_capacity(threads + 2);

        let publisher = Publisher::new(
            self.store.clone(),
            self.config.flush_interval(),
            watermarks.clone(),
        );
        tasks.push((
            "publisher",
            tokio::spawn(publisher.run(item_rx, cursor_rx, cancel.clone())),
        ));

        // The workers own the only item/cursor senders, so the publisher sees
        // its channels close once the last worker has exited.
        let workers = spawn_workers(
            threads,
            Arc::clone(&self.fetcher),
            self.config.source_timeout(),
            Arc::new(Mutex::new(dispatch_rx)),
            watermarks,
            item_tx,
            cursor_tx,
            cancel.clone(),
        );
        tasks.extend(workers.into_iter().map(|handle| ("worker", handle)));

        let scheduler = Scheduler {
            store: self.store.clone(),
            page_size: threads as i64,
            min_cycle_interval: self.config.min_cycle_interval(),
            error_backoff: self.config.error_backoff(),
            dispatch: dispatch_tx,
            cancel: cancel.clone(),
        };
        tasks.push(("scheduler", tokio::spawn(scheduler.run())));

        tracing::info!(
            threads = threads,
            source_timeout = ?self.config.source_timeout(),
            min_cycle_interval = ?self.config.min_cycle_interval(),
            "Aggregator started"
        );
        self.running = Some(Running { cancel, tasks });
    }

    /// Cancel the pipeline and wait until every task has exited.
    ///
    /// Returns once the publisher has made its final flush. A no-op if the
    /// pipeline is not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        for (task, handle) in running.tasks {
            if let Err(e) = handle.await {
                tracing::error!(task = task, error = %e, "Pipeline task failed");
            }
        }
        tracing::info!("Aggregator stopped");
    }

    /// Probe a candidate feed URL with the configured deadline.
    pub async fn check_source(&self, url: &str) -> Result<(), FetchError> {
        probe(self.fetcher.as_ref(), url, self.config.source_timeout()).await
    }

    /// Probe and register a new source with the configured deadline.
    pub async fn add_source(&self, url: &str) -> Result<Registration, RegistrationError> {
        register_source(
            &self.store,
            self.fetcher.as_ref(),
            url,
            self.config.source_timeout(),
        )
        .await
    }
}

impl<S, F> Drop for Aggregator<S, F> {
    fn drop(&mut self) {
        // Dropped without stop(): let the tasks wind down on their own
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
