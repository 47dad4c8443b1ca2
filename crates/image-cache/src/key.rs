//! Cache key derivation

use sha2::{Digest, Sha256};
use std::fmt;

/// Extension used when the URL's last path segment has none
pub const DEFAULT_EXTENSION: &str = "jpg";

const MAX_EXTENSION_LEN: usize = 8;

/// Filesystem-safe name of a cached resource: `<sha256 hex>.<ext>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a URL. Pure and deterministic; any string is accepted.
    pub fn for_url(url: &str) -> Self {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let extension = extension_hint(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        CacheKey(format!("{}.{}", digest, extension))
    }

    /// Accept a file name found in the cache directory as a key.
    ///
    /// Returns `None` for anything `for_url` could not have produced, so
    /// foreign files in the directory are never adopted into the index.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (digest, extension) = name.split_once('.')?;
        let digest_ok = digest.len() == 64
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if digest_ok && is_safe_extension(extension) {
            Some(CacheKey(name.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extension part of the key, without the dot
    pub fn extension(&self) -> &str {
        self.0
            .split_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or(DEFAULT_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Text after the last `.` of the URL's final path segment, if it is a
/// short alphanumeric extension. `None` means the key falls back to
/// [`DEFAULT_EXTENSION`], which says nothing about the content.
pub fn extension_hint(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Not an absolute URL: strip query and fragment by hand
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let segment = path.rsplit('/').next()?;
    let (stem, extension) = segment.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles like "/.hidden" have no extension
        return None;
    }

    let extension = extension.to_ascii_lowercase();
    is_safe_extension(&extension).then_some(extension)
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
}
