use super::schema::Database;
use super::types::{from_unix_millis, FeedItem, StoreError};

/// Maximum number of items returned by a single read (OOM protection)
const MAX_ITEMS: i64 = 2000;

type ItemRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

impl Database {
    // ========================================================================
    // Item Reads
    // ========================================================================

    /// Count persisted items across all sources
    pub async fn item_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(id) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Items of one source, oldest first (insertion order breaks ties).
    ///
    /// Capped at 2000 rows.
    pub async fn items_for_source(&self, source_id: i64) -> Result<Vec<FeedItem>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT source_id, title, description, category, source_link, image_link, published \
             FROM items WHERE source_id = ? ORDER BY published, id LIMIT ?",
        )
        .bind(source_id)
        .bind(MAX_ITEMS)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(source_id, title, description, category, link, image, published)| {
                Ok(FeedItem {
                    source_id,
                    title,
                    description,
                    category,
                    link,
                    image,
                    published: from_unix_millis(published)?,
                })
            })
            .collect()
    }
}
