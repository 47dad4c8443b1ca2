//! On-disk byte storage, one file per cache key

use crate::error::Result;
use crate::key::CacheKey;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Prefix of in-progress writes; such files are never treated as entries
const TEMP_PREFIX: &str = ".partial-";

/// A file found in the cache directory
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub modified: SystemTime,
    pub size: u64,
}

/// Durable mapping from [`CacheKey`] to bytes under a root directory
pub struct Store {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl Store {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            temp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory and drop leftovers of interrupted writes
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let mut removed = 0usize;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = ?entry.path(), error = %e, "Failed to remove partial write")
                    }
                }
            }
        }

        info!(root = ?self.root, removed_partial = removed, "Store initialized");
        Ok(())
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Read the bytes for `key`, `None` if the file is absent
    pub async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write `data` under `key`, replacing any previous bytes.
    ///
    /// Bytes go to a temporary file in the same directory and are renamed into
    /// place once flushed, so readers see either the old file or the new one.
    pub async fn write(&self, key: &CacheKey, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        let temp_path = self.root.join(format!(
            "{}{}-{}",
            TEMP_PREFIX,
            self.temp_counter.fetch_add(1, Ordering::Relaxed),
            key
        ));

        if let Err(e) = write_file(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Wrote cache file");
        Ok(path)
    }

    /// Delete the file for `key`. Returns `false` if it was already gone.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Bump the file's modification time so a restart sees it as recent
    pub async fn touch(&self, key: &CacheKey) -> Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.path_for(key))
            .await?
            .into_std()
            .await;
        tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Every cache file in the root with its modification time
    pub async fn list_all(&self) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = CacheKey::from_file_name(&name.to_string_lossy()) else {
                continue;
            };

            // The file may disappear between listing and stat
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            entries.push(StoredEntry {
                key,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
            });
        }

        Ok(entries)
    }

    /// Delete every regular file under the root, returning how many went
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0usize;
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(removed)
    }
}

async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}
