//! Cache types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an [`ImageCache`](crate::ImageCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one file per cached resource
    pub cache_dir: PathBuf,
    /// Maximum number of cached entries
    pub capacity: usize,
    /// Upper bound on a single remote fetch
    pub fetch_timeout: Duration,
    /// Redirects followed per fetch; 0 disables following
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./.image_cache"),
            capacity: 10,
            fetch_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: concat!("image-cache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub fetch_errors: u64,
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Served from disk without a remote fetch
    Cache,
    /// Fetched from the remote and committed
    Remote,
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub source: Source,
    /// Media type the remote announced, known only for fresh fetches
    pub content_type: Option<String>,
}

impl Resolved {
    pub fn from_cache(&self) -> bool {
        self.source == Source::Cache
    }
}
