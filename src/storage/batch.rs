use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::schema::Database;
use super::types::{FeedItem, Source, StoreError};

/// 7 columns * 50 rows = 350 bound parameters, well under SQLite's 999 limit.
const INSERT_BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Batch Writes
    // ========================================================================

    /// Advance watermarks and insert items inside a single transaction.
    ///
    /// Watermarks only ever move forward: the update keeps the larger of the
    /// stored and the new value. If any statement fails the transaction is
    /// rolled back explicitly and nothing from this batch is visible.
    pub async fn apply_batch(&self, sources: &[Source], items: &[FeedItem]) -> Result<(), StoreError> {
        if sources.is_empty() && items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        match queue_batch(&mut tx, sources, items).await {
            Ok(()) => {
                tx.commit().await?;
                tracing::debug!(
                    sources = sources.len(),
                    items = items.len(),
                    "Batch committed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Batch rollback failed");
                }
                Err(e.into())
            }
        }
    }
}

async fn queue_batch(
    tx: &mut Transaction<'_, Sqlite>,
    sources: &[Source],
    items: &[FeedItem],
) -> Result<(), sqlx::Error> {
    for source in sources {
        sqlx::query("UPDATE sources SET last_parsed = MAX(last_parsed, ?) WHERE id = ?")
            .bind(source.last_parsed.timestamp_millis())
            .bind(source.id)
            .execute(&mut **tx)
            .await?;
    }

    for chunk in items.chunks(INSERT_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO items (source_id, title, description, category, source_link, image_link, published) ",
        );

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(item.source_id)
                .push_bind(&item.title)
                .push_bind(&item.description)
                .push_bind(&item.category)
                .push_bind(&item.link)
                .push_bind(&item.image)
                .push_bind(item.published.timestamp_millis());
        });

        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn db_with_source() -> (Database, Source) {
        let db = Database::open(":memory:").await.unwrap();
        let source = db.create_source("https://example.com/rss").await.unwrap();
        (db, source)
    }

    fn item(source_id: i64, title: &str, day: u32) -> FeedItem {
        FeedItem {
            source_id,
            title: title.to_string(),
            description: Some(format!("{} body", title)),
            category: Some("news".to_string()),
            link: Some(format!("https://example.com/{}", title)),
            image: None,
            published: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    async fn item_titles(db: &Database) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT title FROM items ORDER BY id")
            .fetch_all(&db.pool)
            .await
            .unwrap();
        rows.into_iter().map(|(t,)| t).collect()
    }

    #[tokio::test]
    async fn test_apply_batch_commits_items_and_watermark() {
        let (db, mut source) = db_with_source().await;
        source.last_parsed = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        db.apply_batch(&[source.clone()], &[item(source.id, "a", 2), item(source.id, "b", 3)])
            .await
            .unwrap();

        assert_eq!(item_titles(&db).await, vec!["a", "b"]);
        let stored = db.sources_page(1, 0).await.unwrap();
        assert_eq!(stored[0].last_parsed, source.last_parsed);
    }

    #[tokio::test]
    async fn test_apply_batch_spans_multiple_insert_chunks() {
        let (db, source) = db_with_source().await;
        let items: Vec<FeedItem> = (0..INSERT_BATCH_SIZE * 2 + 7)
            .map(|i| item(source.id, &format!("item-{}", i), 1))
            .collect();

        db.apply_batch(&[], &items).await.unwrap();

        assert_eq!(item_titles(&db).await.len(), items.len());
    }

    #[tokio::test]
    async fn test_watermark_never_moves_backwards() {
        let (db, mut source) = db_with_source().await;

        source.last_parsed = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        db.apply_batch(&[source.clone()], &[]).await.unwrap();

        let mut stale = source.clone();
        stale.last_parsed = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        db.apply_batch(&[stale], &[]).await.unwrap();

        let stored = db.sources_page(1, 0).await.unwrap();
        assert_eq!(stored[0].last_parsed, source.last_parsed);
    }

    #[tokio::test]
    async fn test_failure_mid_batch_rolls_everything_back() {
        let (db, mut source) = db_with_source().await;
        let before = db.sources_page(1, 0).await.unwrap()[0].last_parsed;
        source.last_parsed = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();

        // The third item references a source that does not exist
        let items = vec![
            item(source.id, "a", 2),
            item(source.id, "b", 3),
            item(source.id + 1000, "orphan", 4),
            item(source.id, "c", 5),
        ];
        let result = db.apply_batch(&[source], &items).await;
        assert!(matches!(result, Err(StoreError::Other(_))));

        assert!(item_titles(&db).await.is_empty());
        let stored = db.sources_page(1, 0).await.unwrap();
        assert_eq!(stored[0].last_parsed, before);
    }

    #[tokio::test]
    async fn test_empty_title_rejected_by_schema() {
        let (db, source) = db_with_source().await;
        let result = db.apply_batch(&[], &[item(source.id, "", 1)]).await;
        assert!(result.is_err());
        assert!(item_titles(&db).await.is_empty());
    }
}
