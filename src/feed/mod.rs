//! Feed retrieval: the [`FeedFetcher`] seam used by the worker pool and its
//! HTTP implementation.
//!
//! - [`parser`] - reduces feed-rs output to the fields the pipeline consumes
//! - [`fetcher`] - deadline-bounded HTTP fetching with a body size limit

mod fetcher;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, HttpFetcher};
pub use parser::{parse_feed, ParsedEntry, ParsedFeed};
