//! Persistence layer: the [`Store`] contract the pipeline is written against
//! and its SQLite implementation, [`Database`].

mod batch;
mod items;
mod schema;
mod sources;
mod types;

use std::future::Future;

pub use schema::Database;
pub use types::{
    truncate_to_millis, CursorUpdate, FeedItem, Source, StoreError, INITIAL_WATERMARK_MILLIS,
};

/// Query contract the ingestion pipeline needs from persistence.
///
/// The scheduler only reads, registration reads and inserts, and the publisher
/// is the single caller of [`Store::commit_batch`].
pub trait Store: Clone + Send + Sync + 'static {
    /// Total number of registered sources.
    fn count_sources(&self) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// One page of sources ordered by id.
    fn list_sources(
        &self,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = Result<Vec<Source>, StoreError>> + Send;

    /// Whether a source with exactly this URL is registered.
    fn source_exists(&self, url: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Register a new source with the initial watermark.
    fn insert_source(&self, url: &str) -> impl Future<Output = Result<Source, StoreError>> + Send;

    /// Apply watermark advances and item inserts in one transaction.
    ///
    /// Either everything becomes visible or nothing does.
    fn commit_batch(
        &self,
        sources: &[Source],
        items: &[FeedItem],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl Store for Database {
    async fn count_sources(&self) -> Result<i64, StoreError> {
        self.source_count().await
    }

    async fn list_sources(&self, limit: i64, offset: i64) -> Result<Vec<Source>, StoreError> {
        self.sources_page(limit, offset).await
    }

    async fn source_exists(&self, url: &str) -> Result<bool, StoreError> {
        self.has_source_url(url).await
    }

    async fn insert_source(&self, url: &str) -> Result<Source, StoreError> {
        self.create_source(url).await
    }

    async fn commit_batch(&self, sources: &[Source], items: &[FeedItem]) -> Result<(), StoreError> {
        self.apply_batch(sources, items).await
    }
}
