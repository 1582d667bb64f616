use std::time::Duration;
use thiserror::Error;

use crate::feed::{FeedFetcher, FetchError};
use crate::storage::{Source, Store, StoreError};

/// Errors from [`register_source`].
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("URL cannot be empty")]
    EmptyUrl,
    /// Not an absolute http(s) URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The URL did not yield a parseable feed
    #[error("Feed check failed: {0}")]
    Probe(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a successful registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added(Source),
    /// The URL was registered before; nothing was changed.
    AlreadyExists,
}

/// Check that `url` can be fetched and parsed as a feed within `deadline`.
pub async fn probe<F: FeedFetcher>(
    fetcher: &F,
    url: &str,
    deadline: Duration,
) -> Result<(), FetchError> {
    let feed = fetcher.fetch(url, deadline).await?;
    tracing::debug!(url = %url, entries = feed.entries.len(), "Feed probe succeeded");
    Ok(())
}

/// Register a new feed source after probing it.
///
/// The URL is trimmed first. Known URLs are reported as
/// [`Registration::AlreadyExists`] without fetching anything.
pub async fn register_source<S: Store, F: FeedFetcher>(
    store: &S,
    fetcher: &F,
    url: &str,
    deadline: Duration,
) -> Result<Registration, RegistrationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RegistrationError::EmptyUrl);
    }

    let parsed = url::Url::parse(url).map_err(|e| RegistrationError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RegistrationError::InvalidUrl(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    if store.source_exists(url).await? {
        tracing::debug!(url = %url, "Source already registered");
        return Ok(Registration::AlreadyExists);
    }

    probe(fetcher, url, deadline).await?;

    let source = store.insert_source(url).await?;
    Ok(Registration::Added(source))
}
