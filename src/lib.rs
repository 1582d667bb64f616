//! rssmill: polls registered RSS/Atom feeds and persists new items.
//!
//! - [`pipeline`] - scheduler, worker pool, batching publisher and lifecycle
//! - [`feed`] - the fetch/parse seam and its HTTP implementation
//! - [`storage`] - the persistence contract and its SQLite implementation
//! - [`config`] - TOML configuration

pub mod config;
pub mod feed;
pub mod pipeline;
pub mod storage;
