use super::schema::Database;
use super::types::{from_unix_millis, Source, SourceRow, StoreError, INITIAL_WATERMARK_MILLIS};

impl Database {
    // ========================================================================
    // Source Queries
    // ========================================================================

    /// Count registered sources
    pub async fn source_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(id) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get one page of sources in id order.
    ///
    /// The scheduler walks the whole table page by page, so the order must be
    /// stable across calls.
    pub async fn sources_page(&self, limit: i64, offset: i64) -> Result<Vec<Source>, StoreError> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT id, url, last_parsed FROM sources ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Source::from_row).collect()
    }

    /// Check whether a URL is already registered
    pub async fn has_source_url(&self, url: &str) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(id) FROM sources WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(count != 0)
    }

    // ========================================================================
    // Source Mutations
    // ========================================================================

    /// Insert a new source with the initial watermark, returning it
    pub async fn create_source(&self, url: &str) -> Result<Source, StoreError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO sources (url, last_parsed) VALUES (?, ?) RETURNING id")
                .bind(url)
                .bind(INITIAL_WATERMARK_MILLIS)
                .fetch_one(&self.pool)
                .await?;

        tracing::info!(source_id = id, url = %url, "Source registered");
        Ok(Source {
            id,
            url: url.to_string(),
            last_parsed: from_unix_millis(INITIAL_WATERMARK_MILLIS)?,
        })
    }
}
