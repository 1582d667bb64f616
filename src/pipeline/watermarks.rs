//! Watermark advances that have been emitted but may not be committed yet.
//!
//! The scheduler reads watermarks from the store, and a pass can start before
//! the publisher has flushed the previous one. Workers therefore select items
//! against the later of the stored watermark and the last advance recorded
//! here, so a source polled twice in quick succession does not emit the same
//! entries twice.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::pool::{extract_new_items, Extraction};
use crate::feed::ParsedFeed;
use crate::storage::Source;

#[derive(Clone, Default)]
pub(crate) struct Watermarks {
    inner: Arc<Mutex<HashMap<i64, DateTime<Utc>>>>,
}

impl Watermarks {
    fn lock(&self) -> MutexGuard<'_, HashMap<i64, DateTime<Utc>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the new entries of `feed` and record the resulting advance.
    ///
    /// Selection and recording happen under one lock, so two workers holding
    /// the same source never both emit an entry.
    pub fn select(&self, source: &Source, feed: ParsedFeed, now: DateTime<Utc>) -> Extraction {
        let mut marks = self.lock();

        let mut effective = source.clone();
        match marks.get(&source.id).copied() {
            // The store has caught up
            Some(mark) if mark <= source.last_parsed => {
                marks.remove(&source.id);
            }
            Some(mark) => effective.last_parsed = mark,
            None => {}
        }

        let extraction = extract_new_items(&effective, feed, now);
        if let Some(watermark) = extraction.watermark {
            marks.insert(source.id, watermark);
        }
        extraction
    }

    /// Drop recorded advances, e.g. after their batch failed to commit.
    pub fn forget(&self, source_ids: impl IntoIterator<Item = i64>) {
        let mut marks = self.lock();
        for id in source_ids {
            marks.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn get(&self, source_id: i64) -> Option<DateTime<Utc>> {
        self.lock().get(&source_id).copied()
    }
}
