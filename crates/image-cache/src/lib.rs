//! Disk-backed LRU cache for remote images
//!
//! Resources are addressed by URL and stored one file per entry under a cache
//! directory. An in-memory recency index picks eviction victims so the cache
//! never holds more than its configured number of entries. Concurrent misses
//! for the same URL share a single remote fetch.

mod cache;
mod error;
mod fetcher;
mod key;
mod recency;
mod store;
mod types;

pub use cache::ImageCache;
pub use error::{CacheError, Result};
pub use fetcher::{FetchResponse, HttpFetcher, RemoteFetcher};
pub use futures::future::BoxFuture;
pub use key::{extension_hint, CacheKey, DEFAULT_EXTENSION};
pub use recency::RecencyIndex;
pub use store::{Store, StoredEntry};
pub use types::{CacheConfig, CacheStats, Resolved, Source};
