//! The single writer of the pipeline.
//!
//! Items and cursor updates arrive on separate channels and may interleave
//! arbitrarily, so items are staged per source. A source's cursor update and
//! the items it announces are moved into the pending batch together, which
//! guarantees that a watermark is never committed without its items (or the
//! other way round).

use std::collections::HashMap;
use std::mem;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::watermarks::Watermarks;
use crate::storage::{CursorUpdate, FeedItem, Source, Store};

pub(crate) struct Publisher<S> {
    store: S,
    flush_interval: Duration,
    watermarks: Watermarks,
    /// Items received for sources whose group is not complete yet
    staged: HashMap<i64, Vec<FeedItem>>,
    /// Cursor updates still waiting for some of their items
    awaiting: HashMap<i64, CursorUpdate>,
    pending_sources: Vec<Source>,
    pending_items: Vec<FeedItem>,
}

impl<S: Store> Publisher<S> {
    pub fn new(store: S, flush_interval: Duration, watermarks: Watermarks) -> Self {
        Self {
            store,
            flush_interval,
            watermarks,
            staged: HashMap::new(),
            awaiting: HashMap::new(),
            pending_sources: Vec::new(),
            pending_items: Vec::new(),
        }
    }

    /// Receive and flush until every sender has hung up.
    ///
    /// Cancellation switches the publisher into draining mode: it keeps
    /// receiving until the workers have finished their in-flight sources and
    /// dropped their senders, then performs the final flush.
    pub async fn run(
        mut self,
        mut items: mpsc::Receiver<FeedItem>,
        mut cursors: mpsc::Receiver<CursorUpdate>,
        cancel: CancellationToken,
    ) {
        let mut ticker = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut items_open = true;
        let mut cursors_open = true;
        let mut draining = false;

        while items_open || cursors_open {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                item = items.recv(), if items_open => match item {
                    Some(item) => self.stage_item(item),
                    None => items_open = false,
                },
                update = cursors.recv(), if cursors_open => match update {
                    Some(update) => self.stage_cursor(update),
                    None => cursors_open = false,
                },
                _ = cancel.cancelled(), if !draining => {
                    tracing::debug!("Publisher draining");
                    draining = true;
                }
            }
        }

        self.discard_incomplete();
        self.flush().await;
        tracing::debug!("Publisher stopped");
    }

    fn stage_item(&mut self, item: FeedItem) {
        let source_id = item.source_id;
        self.staged.entry(source_id).or_default().push(item);
        self.promote(source_id);
    }

    fn stage_cursor(&mut self, mut update: CursorUpdate) {
        let source_id = update.source.id;
        // Two polls of the same source before the first completed: commit
        // them as one group under the later watermark.
        if let Some(previous) = self.awaiting.remove(&source_id) {
            update.items += previous.items;
            if previous.source.last_parsed > update.source.last_parsed {
                update.source = previous.source;
            }
        }
        self.awaiting.insert(source_id, update);
        self.promote(source_id);
    }

    /// Move a source's cursor and items into the pending batch once all
    /// announced items have arrived.
    fn promote(&mut self, source_id: i64) {
        let staged_len = self.staged.get(&source_id).map_or(0, Vec::len);
        let ready = self
            .awaiting
            .get(&source_id)
            .is_some_and(|update| staged_len >= update.items);
        if !ready {
            return;
        }

        let Some(update) = self.awaiting.remove(&source_id) else {
            return;
        };
        if let Some(staged) = self.staged.get_mut(&source_id) {
            self.pending_items.extend(staged.drain(..update.items));
            if staged.is_empty() {
                self.staged.remove(&source_id);
            }
        }
        self.pending_sources.push(update.source);
    }

    fn discard_incomplete(&mut self) {
        let items: usize = self.staged.values().map(Vec::len).sum();
        let cursors = self.awaiting.len();
        if items > 0 || cursors > 0 {
            tracing::warn!(
                items = items,
                cursors = cursors,
                "Discarding incomplete source batches; they will be fetched again"
            );
        }
        self.staged.clear();
        self.awaiting.clear();
    }

    /// Commit everything pending in one transaction.
    ///
    /// A failed batch is dropped, not retried: the sources keep their old
    /// watermark, and their recorded advances are forgotten so a later cycle
    /// selects the entries again.
    async fn flush(&mut self) {
        if self.pending_sources.is_empty() && self.pending_items.is_empty() {
            return;
        }

        let sources = mem::take(&mut self.pending_sources);
        let items = mem::take(&mut self.pending_items);

        match self.store.commit_batch(&sources, &items).await {
            Ok(()) => {
                tracing::debug!(sources = sources.len(), items = items.len(), "Batch flushed");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    sources = sources.len(),
                    items = items.len(),
                    "Batch flush failed, dropping batch"
                );
                self.watermarks.forget(sources.iter().map(|source| source.id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ParsedEntry, ParsedFeed};
    use crate::storage::Database;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn item(source_id: i64, title: &str, day: u32) -> FeedItem {
        FeedItem {
            source_id,
            title: title.to_string(),
            description: None,
            category: None,
            link: None,
            image: None,
            published: ts(day),
        }
    }

    fn cursor(source: &Source, day: u32, items: usize) -> CursorUpdate {
        let mut source = source.clone();
        source.last_parsed = ts(day);
        CursorUpdate { source, items }
    }

    async fn setup() -> (Database, Source, Source) {
        let db = Database::open(":memory:").await.unwrap();
        let a = db.create_source("https://a.example/rss").await.unwrap();
        let b = db.create_source("https://b.example/rss").await.unwrap();
        (db, a, b)
    }

    async fn titles(db: &Database) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT title FROM items ORDER BY id")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        rows.into_iter().map(|(t,)| t).collect()
    }

    #[tokio::test]
    async fn test_cursor_waits_for_announced_items() {
        let (db, a, _) = setup().await;
        let mut publisher = Publisher::new(db, Duration::from_secs(1), Watermarks::default());

        publisher.stage_item(item(a.id, "one", 2));
        publisher.stage_cursor(cursor(&a, 3, 2));
        assert!(publisher.pending_sources.is_empty());
        assert!(publisher.pending_items.is_empty());

        publisher.stage_item(item(a.id, "two", 3));
        assert_eq!(publisher.pending_sources.len(), 1);
        assert_eq!(publisher.pending_items.len(), 2);
        assert!(publisher.staged.is_empty());
        assert!(publisher.awaiting.is_empty());
    }

    #[tokio::test]
    async fn test_interleaved_sources_promoted_independently() {
        let (db, a, b) = setup().await;
        let mut publisher = Publisher::new(db, Duration::from_secs(1), Watermarks::default());

        publisher.stage_item(item(a.id, "a1", 2));
        publisher.stage_item(item(b.id, "b1", 2));
        publisher.stage_cursor(cursor(&b, 2, 1));
        assert_eq!(publisher.pending_sources.len(), 1);
        assert_eq!(publisher.pending_sources[0].id, b.id);
        assert_eq!(publisher.pending_items, vec![item(b.id, "b1", 2)]);

        publisher.stage_cursor(cursor(&a, 2, 1));
        assert_eq!(publisher.pending_sources.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_cursor_merges_disjoint_polls() {
        let (db, a, _) = setup().await;
        let mut publisher = Publisher::new(db, Duration::from_secs(1), Watermarks::default());

        publisher.stage_cursor(cursor(&a, 5, 1));
        publisher.stage_cursor(cursor(&a, 4, 1));
        publisher.stage_item(item(a.id, "x", 5));
        assert!(publisher.pending_sources.is_empty());

        publisher.stage_item(item(a.id, "y", 4));
        assert_eq!(publisher.pending_sources.len(), 1);
        assert_eq!(publisher.pending_sources[0].last_parsed, ts(5));
        assert_eq!(publisher.pending_items.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_commits_and_clears() {
        let (db, a, _) = setup().await;
        let mut publisher = Publisher::new(db.clone(), Duration::from_secs(1), Watermarks::default());

        publisher.stage_item(item(a.id, "one", 2));
        publisher.stage_cursor(cursor(&a, 2, 1));
        publisher.flush().await;

        assert!(publisher.pending_items.is_empty());
        assert!(publisher.pending_sources.is_empty());
        assert_eq!(titles(&db).await, vec!["one"]);
        assert_eq!(db.sources_page(1, 0).await.unwrap()[0].last_parsed, ts(2));
    }

    #[tokio::test]
    async fn test_failed_flush_drops_batch_and_recovers() {
        let (db, a, _) = setup().await;
        let marks = Watermarks::default();
        let mut publisher = Publisher::new(db.clone(), Duration::from_secs(1), marks.clone());

        let feed = ParsedFeed {
            image: None,
            entries: vec![ParsedEntry {
                title: Some("good".into()),
                published: Some(ts(2)),
                ..ParsedEntry::default()
            }],
        };
        assert_eq!(marks.select(&a, feed, ts(20)).items.len(), 1);
        assert_eq!(marks.get(a.id), Some(ts(2)));

        let ghost = Source {
            id: 9999,
            url: "https://ghost.example/rss".into(),
            last_parsed: ts(1),
        };
        publisher.stage_item(item(a.id, "good", 2));
        publisher.stage_cursor(cursor(&a, 2, 1));
        publisher.stage_item(item(ghost.id, "orphan", 3));
        publisher.stage_cursor(cursor(&ghost, 3, 1));
        publisher.flush().await;

        assert!(titles(&db).await.is_empty());
        assert!(publisher.pending_items.is_empty());
        assert!(publisher.pending_sources.is_empty());
        // Lost entries become selectable again
        assert_eq!(marks.get(a.id), None);

        publisher.stage_item(item(a.id, "later", 4));
        publisher.stage_cursor(cursor(&a, 4, 1));
        publisher.flush().await;
        assert_eq!(titles(&db).await, vec!["later"]);
    }

    #[tokio::test]
    async fn test_run_flushes_on_timer() {
        let (db, a, _) = setup().await;
        let publisher = Publisher::new(db.clone(), Duration::from_millis(50), Watermarks::default());
        let (item_tx, item_rx) = mpsc::channel(1);
        let (cursor_tx, cursor_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publisher.run(item_rx, cursor_rx, cancel.clone()));

        item_tx.send(item(a.id, "tick", 2)).await.unwrap();
        cursor_tx.send(cursor(&a, 2, 1)).await.unwrap();

        let mut flushed = false;
        for _ in 0..100 {
            if titles(&db).await == vec!["tick"] {
                flushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(flushed, "timer flush should have committed the batch");

        cancel.cancel();
        drop(item_tx);
        drop(cursor_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_final_flush_after_cancel() {
        let (db, a, b) = setup().await;
        // Long interval: only the final flush can commit
        let publisher = Publisher::new(db.clone(), Duration::from_secs(3600), Watermarks::default());
        let (item_tx, item_rx) = mpsc::channel(1);
        let (cursor_tx, cursor_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publisher.run(item_rx, cursor_rx, cancel.clone()));

        item_tx.send(item(a.id, "a1", 2)).await.unwrap();
        cursor_tx.send(cursor(&a, 2, 1)).await.unwrap();
        cancel.cancel();

        // Still accepted while draining
        item_tx.send(item(b.id, "b1", 3)).await.unwrap();
        cursor_tx.send(cursor(&b, 3, 1)).await.unwrap();
        // Incomplete group: announced two items, only one arrives
        item_tx.send(item(a.id, "a2", 4)).await.unwrap();
        cursor_tx.send(cursor(&a, 4, 2)).await.unwrap();

        drop(item_tx);
        drop(cursor_tx);
        handle.await.unwrap();

        let mut stored = titles(&db).await;
        stored.sort();
        assert_eq!(stored, vec!["a1", "b1"]);
        let sources = db.sources_page(10, 0).await.unwrap();
        assert_eq!(sources[0].last_parsed, ts(2));
        assert_eq!(sources[1].last_parsed, ts(3));
    }
}
