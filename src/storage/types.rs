use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence errors surfaced by the [`Store`](super::Store) contract
#[derive(Debug, Error)]
pub enum StoreError {
    /// Migration failed while opening the database
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored timestamp could not be represented as a UTC datetime
    #[error("Invalid timestamp in database: {0}")]
    InvalidTimestamp(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Timestamps
// ============================================================================

/// Watermark given to freshly registered sources (0001-01-01T00:00:00Z),
/// in Unix milliseconds.
pub const INITIAL_WATERMARK_MILLIS: i64 = -62_135_596_800_000;

/// Convert stored Unix milliseconds back into a UTC datetime.
pub(crate) fn from_unix_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp(millis))
}

/// Drop sub-millisecond precision so in-memory comparisons match what SQLite keeps.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for source queries
pub(crate) type SourceRow = (i64, String, i64);

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed endpoint together with its polling watermark.
///
/// The pipeline moves `Source` values between stages by channel send; a
/// worker owns the value it was handed and only the publisher writes the
/// advanced watermark back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub url: String,
    /// Items at or before this instant are considered already seen.
    pub last_parsed: DateTime<Utc>,
}

impl Source {
    pub(crate) fn from_row((id, url, last_parsed): SourceRow) -> Result<Self, StoreError> {
        Ok(Self {
            id,
            url,
            last_parsed: from_unix_millis(last_parsed)?,
        })
    }
}

/// One entry extracted from a source's feed, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub source_id: i64,
    /// Never empty: untitled entries are discarded before a `FeedItem` is built.
    pub title: String,
    pub description: Option<String>,
    /// First category of the entry, if it declared any
    pub category: Option<String>,
    pub link: Option<String>,
    /// Feed-level image URL
    pub image: Option<String>,
    /// Resolved timestamp (updated, else published, else time of processing)
    pub published: DateTime<Utc>,
}

/// An advanced watermark plus the number of items emitted alongside it.
///
/// The publisher only commits the cursor once it has received `items`
/// entries for the same source, so both land in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdate {
    pub source: Source,
    pub items: usize,
}
