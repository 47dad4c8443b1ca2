//! Disk-backed LRU cache with single-flight remote fetching
//!
//! Lookups go to disk first. Misses for the same key share one spawned fetch
//! task; the network call runs outside the index lock, and only the
//! pre-fetch eviction and the post-fetch commit hold it.

use crate::error::{CacheError, Result};
use crate::fetcher::{FetchResponse, HttpFetcher, RemoteFetcher};
use crate::key::CacheKey;
use crate::recency::RecencyIndex;
use crate::store::Store;
use crate::types::{CacheConfig, CacheStats, Resolved, Source};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Flight = Shared<BoxFuture<'static, Result<Resolved>>>;

/// Cheaply cloneable handle to a disk-backed LRU cache of remote resources
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    /// Recency order of committed entries
    index: Mutex<RecencyIndex>,
    /// Slots promised to fetches that have not committed yet
    reserved: AtomicUsize,
    /// One shared fetch per key
    in_flight: std::sync::Mutex<HashMap<CacheKey, Flight>>,
    fetcher: Arc<dyn RemoteFetcher>,
    capacity: usize,
    fetch_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    fetch_errors: AtomicU64,
}

impl ImageCache {
    /// Create a cache that fetches over HTTP
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config)?;
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Create a cache around any remote fetcher
    pub fn with_fetcher<F: RemoteFetcher>(config: &CacheConfig, fetcher: F) -> Self {
        let capacity = if config.capacity == 0 {
            warn!("Cache capacity of 0 requested, using 1");
            1
        } else {
            config.capacity
        };

        Self {
            inner: Arc::new(Inner {
                store: Store::new(config.cache_dir.clone()),
                index: Mutex::new(RecencyIndex::new()),
                reserved: AtomicUsize::new(0),
                in_flight: std::sync::Mutex::new(HashMap::new()),
                fetcher: Arc::new(fetcher),
                capacity,
                fetch_timeout: config.fetch_timeout,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                fetch_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Prepare the cache directory and rebuild the recency index from it.
    ///
    /// Files are ordered by modification time; anything beyond capacity is
    /// evicted oldest first.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        inner.store.init().await?;

        let entries = inner.store.list_all().await?;
        let found = entries.len();

        let mut index = inner.index.lock().await;
        *index = RecencyIndex::rebuild(entries.into_iter().map(|e| (e.key, e.modified)));
        let trimmed = inner.make_room(&mut index, 0).await;

        info!(
            cache_dir = ?inner.store.root(),
            entries = index.len(),
            found,
            trimmed,
            capacity = inner.capacity,
            "Cache initialized"
        );
        Ok(())
    }

    /// Local path for `url`, fetching it on a miss
    pub async fn get(&self, url: &str) -> Result<PathBuf> {
        self.fetch(url, false).await
    }

    /// Local path for `url`; `force_refresh` always goes to the remote
    pub async fn fetch(&self, url: &str, force_refresh: bool) -> Result<PathBuf> {
        self.resolve(url, force_refresh).await.map(|r| r.path)
    }

    /// Like [`fetch`](Self::fetch) but also reports whether it was a hit
    pub async fn resolve(&self, url: &str, force_refresh: bool) -> Result<Resolved> {
        let key = CacheKey::for_url(url);

        let resolved = if force_refresh {
            let resolved = self.join_flight(key.clone(), url, true).await?;
            if resolved.source == Source::Cache {
                // Joined a plain lookup that was satisfied from disk
                self.join_flight(key, url, true).await?
            } else {
                resolved
            }
        } else {
            match self.inner.try_hit(&key).await {
                Some(path) => Resolved {
                    path,
                    source: Source::Cache,
                    content_type: None,
                },
                None => self.join_flight(key, url, false).await?,
            }
        };

        match resolved.source {
            Source::Cache => self.inner.hits.fetch_add(1, Ordering::Relaxed),
            Source::Remote => self.inner.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(resolved)
    }

    /// Bytes for `url`, fetching on a miss
    pub async fn load(&self, url: &str, force_refresh: bool) -> Result<(Vec<u8>, Resolved)> {
        let key = CacheKey::for_url(url);
        let resolved = self.resolve(url, force_refresh).await?;
        if let Some(data) = self.inner.store.read(&key).await? {
            return Ok((data, resolved));
        }

        // Evicted between resolving and reading
        debug!(key = %key, "Entry vanished before read, resolving again");
        let resolved = self.resolve(url, false).await?;
        match self.inner.store.read(&key).await? {
            Some(data) => Ok((data, resolved)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cache entry {} disappeared", key),
            )
            .into()),
        }
    }

    /// Whether bytes for `url` are on disk. Does not touch recency.
    pub async fn is_cached(&self, url: &str) -> bool {
        self.inner.store.exists(&CacheKey::for_url(url)).await
    }

    /// Delete every cached file and empty the index
    pub async fn clear(&self) -> Result<()> {
        let mut index = self.inner.index.lock().await;
        let result = self.inner.store.clear().await;
        // Files left behind by a failed clear become unindexed orphans
        index.clear();
        let removed = result?;
        info!(removed, cache_dir = ?self.inner.store.root(), "Cleared cache");
        Ok(())
    }

    /// Number of indexed entries
    pub async fn size(&self) -> usize {
        self.inner.index.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn cache_key(&self, url: &str) -> CacheKey {
        CacheKey::for_url(url)
    }

    /// Where the bytes for `url` live (or would live) on disk
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.inner.store.path_for(&CacheKey::for_url(url))
    }

    /// Keys from least to most recently used
    pub async fn keys_lru_order(&self) -> Vec<CacheKey> {
        self.inner
            .index
            .lock()
            .await
            .iter_lru_order()
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            entries: self.size().await,
            capacity: inner.capacity,
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            evictions: inner.evictions.load(Ordering::Relaxed),
            fetch_errors: inner.fetch_errors.load(Ordering::Relaxed),
        }
    }

    /// Zero the hit, miss, eviction and error counters
    pub fn reset_stats(&self) {
        let inner = &self.inner;
        inner.hits.store(0, Ordering::Relaxed);
        inner.misses.store(0, Ordering::Relaxed);
        inner.evictions.store(0, Ordering::Relaxed);
        inner.fetch_errors.store(0, Ordering::Relaxed);
    }

    /// Wait on the fetch for `key`, starting one if none is running
    async fn join_flight(&self, key: CacheKey, url: &str, force_refresh: bool) -> Result<Resolved> {
        let flight = {
            let mut flights = self.inner.flights();
            match flights.get(&key) {
                Some(flight) => {
                    debug!(key = %key, url = %url, "Joining in-flight fetch");
                    flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let handle =
                        tokio::spawn(inner.run_flight(key.clone(), url.to_string(), force_refresh));
                    let flight = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(CacheError::Task(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    flights.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

impl Inner {
    fn flights(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Flight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `key` from disk if present, reconciling the index with the file
    async fn try_hit(&self, key: &CacheKey) -> Option<PathBuf> {
        let mut index = self.index.lock().await;
        if !self.hit_locked(&mut index, key).await {
            return None;
        }
        drop(index);

        if let Err(e) = self.store.touch(key).await {
            debug!(key = %key, error = %e, "Failed to bump cache file mtime");
        }
        debug!(key = %key, "Cache hit");
        Some(self.store.path_for(key))
    }

    /// With the index locked: touch `key` if its file exists, adopting
    /// unindexed files and dropping index entries whose file is gone
    async fn hit_locked(&self, index: &mut RecencyIndex, key: &CacheKey) -> bool {
        if !self.store.exists(key).await {
            if index.remove(key) {
                warn!(key = %key, "Cache file missing, dropped index entry");
            }
            return false;
        }

        if index.contains(key) {
            index.touch(key);
        } else {
            self.make_room(index, 1).await;
            index.insert_most_recent(key.clone());
            debug!(key = %key, "Adopted unindexed cache file");
        }
        true
    }

    /// Evict least recently used entries until `incoming` more fit.
    ///
    /// The index entry goes first, then the file. A file that cannot be
    /// deleted is left as an orphan. Returns how many entries were evicted.
    async fn make_room(&self, index: &mut RecencyIndex, incoming: usize) -> usize {
        let mut evicted = 0;
        while index.len() + incoming > self.capacity {
            let Some(victim) = index.evict_least_recent() else {
                break;
            };
            evicted += 1;
            self.evictions.fetch_add(1, Ordering::Relaxed);

            match self.store.delete(&victim).await {
                Ok(true) => debug!(key = %victim, "Evicted least recently used entry"),
                Ok(false) => debug!(key = %victim, "Evicted entry was already gone from disk"),
                Err(e) => warn!(key = %victim, error = %e, "Failed to delete evicted file"),
            }
        }
        evicted
    }

    /// Body of a single flight: reserve, fetch, commit
    async fn run_flight(
        self: Arc<Self>,
        key: CacheKey,
        url: String,
        force_refresh: bool,
    ) -> Result<Resolved> {
        let _flight = FlightGuard {
            inner: &*self,
            key: &key,
        };

        let outcome = self.flight_inner(&key, &url, force_refresh).await;
        if let Err(e) = &outcome {
            if e.is_fetch_error() {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
            }
            warn!(url = %url, key = %key, error = %e, "Failed to fetch resource");
        }
        outcome
    }

    async fn flight_inner(
        &self,
        key: &CacheKey,
        url: &str,
        force_refresh: bool,
    ) -> Result<Resolved> {
        let reservation = {
            let mut index = self.index.lock().await;

            // Another flight may have committed since the caller looked
            if !force_refresh && self.hit_locked(&mut index, key).await {
                return Ok(Resolved {
                    path: self.store.path_for(key),
                    source: Source::Cache,
                    content_type: None,
                });
            }

            if force_refresh && index.contains(key) && !self.store.exists(key).await {
                index.remove(key);
                warn!(key = %key, "Cache file missing, dropped index entry");
            }

            if index.contains(key) {
                // Refreshing an indexed entry reuses its slot
                None
            } else {
                let pending = self.reserved.load(Ordering::Acquire) + 1;
                self.make_room(&mut index, pending).await;
                self.reserved.fetch_add(1, Ordering::AcqRel);
                Some(Reservation {
                    reserved: &self.reserved,
                })
            }
        };

        debug!(url = %url, key = %key, force_refresh, "Cache miss, fetching");
        let response = self.fetch_remote(url).await?;
        let body = response.body;

        let mut index = self.index.lock().await;
        drop(reservation);

        // Bytes must be durable before the index advertises the key, and a
        // failed write must not cost another entry its slot
        let path = self.store.write(key, &body).await?;
        if !index.contains(key) {
            self.make_room(&mut index, 1).await;
        }
        index.insert_most_recent(key.clone());

        info!(url = %url, key = %key, size = body.len(), entries = index.len(), "Cached resource");
        Ok(Resolved {
            path,
            source: Source::Remote,
            content_type: response.content_type,
        })
    }

    async fn fetch_remote(&self, url: &str) -> Result<FetchResponse> {
        let response = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| CacheError::Timeout(self.fetch_timeout))??;

        if response.status != 200 {
            return Err(CacheError::Status(response.status));
        }
        Ok(response)
    }
}

/// Removes the in-flight entry when its task ends, including on panic
struct FlightGuard<'a> {
    inner: &'a Inner,
    key: &'a CacheKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.flights().remove(self.key);
    }
}

/// A capacity slot held by a fetch until it commits or fails
struct Reservation<'a> {
    reserved: &'a AtomicUsize,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}
