//! Fetch/parse workers.
//!
//! Every worker pulls sources from one shared dispatch queue, fetches the
//! feed under a deadline and emits the entries newer than the source's
//! watermark, followed by the advanced watermark itself.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::feed::{FeedFetcher, ParsedEntry, ParsedFeed};
use super::watermarks::Watermarks;
use crate::storage::{truncate_to_millis, CursorUpdate, FeedItem, Source};

/// Receiving end of the dispatch queue, shared by all workers.
pub(crate) type DispatchQueue = Arc<Mutex<mpsc::Receiver<Source>>>;

/// Items selected from one fetch of a source.
#[derive(Debug, Default, PartialEq)]
pub struct Extraction {
    pub items: Vec<FeedItem>,
    /// Largest resolved timestamp among `items`, `None` when nothing qualified
    pub watermark: Option<DateTime<Utc>>,
}

/// Timestamp an entry is judged by: updated, else published, else `now`.
pub fn resolve_timestamp(entry: &ParsedEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_millis(entry.updated.or(entry.published).unwrap_or(now))
}

/// Select the entries of `feed` that are new for `source`.
///
/// Untitled entries are skipped. An entry qualifies when its resolved
/// timestamp is strictly after `source.last_parsed`.
pub fn extract_new_items(source: &Source, feed: ParsedFeed, now: DateTime<Utc>) -> Extraction {
    let mut extraction = Extraction::default();

    for entry in feed.entries {
        let title = match entry.title.as_deref() {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => continue,
        };

        let published = resolve_timestamp(&entry, now);
        if published <= source.last_parsed {
            continue;
        }

        if extraction.watermark.map_or(true, |max| published > max) {
            extraction.watermark = Some(published);
        }

        extraction.items.push(FeedItem {
            source_id: source.id,
            title,
            description: entry.description,
            category: entry.categories.into_iter().next(),
            link: entry.link,
            image: feed.image.clone(),
            published,
        });
    }

    extraction
}

pub(crate) struct Worker<F> {
    pub id: usize,
    pub fetcher: Arc<F>,
    pub deadline: Duration,
    pub queue: DispatchQueue,
    pub watermarks: Watermarks,
    pub items: mpsc::Sender<FeedItem>,
    pub cursors: mpsc::Sender<CursorUpdate>,
    pub cancel: CancellationToken,
}

impl<F: FeedFetcher> Worker<F> {
    /// Process sources until cancelled or until the scheduler hangs up.
    ///
    /// Cancellation is only observed between sources: a source that has been
    /// taken off the queue is always finished.
    pub async fn run(self) {
        tracing::debug!(worker = self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                source = async { self.queue.lock().await.recv().await } => source,
            };

            let Some(source) = next else {
                break;
            };

            if !self.process(source).await {
                tracing::warn!(worker = self.id, "Publisher closed, worker exiting");
                break;
            }
        }

        tracing::debug!(worker = self.id, "Worker stopped");
    }

    /// Returns `false` once the publisher has hung up.
    async fn process(&self, mut source: Source) -> bool {
        let feed = match self.fetcher.fetch(&source.url, self.deadline).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(
                    worker = self.id,
                    source_id = source.id,
                    url = %source.url,
                    error = %e,
                    "Source fetch failed"
                );
                return true;
            }
        };

        let Extraction { items, watermark } = self.watermarks.select(&source, feed, Utc::now());
        let Some(watermark) = watermark else {
            tracing::debug!(worker = self.id, source_id = source.id, "No new items");
            return true;
        };

        let count = items.len();
        for item in items {
            if self.items.send(item).await.is_err() {
                return false;
            }
        }

        source.last_parsed = watermark;
        tracing::debug!(
            worker = self.id,
            source_id = source.id,
            items = count,
            watermark = %watermark,
            "Source parsed"
        );
        self.cursors
            .send(CursorUpdate {
                source,
                items: count,
            })
            .await
            .is_ok()
    }
}

/// Spawn `width` workers sharing `queue`.
pub(crate) fn spawn_workers<F: FeedFetcher>(
    width: usize,
    fetcher: Arc<F>,
    deadline: Duration,
    queue: DispatchQueue,
    watermarks: Watermarks,
    items: mpsc::Sender<FeedItem>,
    cursors: mpsc::Sender<CursorUpdate>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..width)
        .map(|id| {
            let worker = Worker {
                id,
                fetcher: Arc::clone(&fetcher),
                deadline,
                queue: Arc::clone(&queue),
                watermarks: watermarks.clone(),
                items: items.clone(),
                cursors: cursors.clone(),
                cancel: cancel.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect()
}
