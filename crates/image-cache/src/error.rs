//! Error types for the image cache

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by the cache.
///
/// Cloneable so that one in-flight fetch can hand the same outcome to every
/// caller waiting on it.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Connection, TLS or body read failure
    Transport(String),
    /// Remote answered with something other than 200
    Status(u16),
    /// Remote fetch exceeded the configured timeout
    Timeout(Duration),
    Io(Arc<std::io::Error>),
    /// The fetch task panicked or was aborted
    Task(String),
}

impl CacheError {
    /// Whether the error came from the remote side rather than local disk
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            CacheError::Transport(_) | CacheError::Status(_) | CacheError::Timeout(_)
        )
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Transport(msg) => write!(f, "Transport error: {}", msg),
            CacheError::Status(status) => write!(f, "Remote returned HTTP {}", status),
            CacheError::Timeout(after) => write!(f, "Fetch timed out after {:?}", after),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Task(msg) => write!(f, "Fetch task failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
