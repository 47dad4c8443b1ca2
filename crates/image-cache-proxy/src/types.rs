//! Core types for the image cache proxy

use image_cache::{CacheConfig, CacheStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub cache: CacheConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            cache: CacheConfig {
                cache_dir: PathBuf::from("./cache/images"),
                capacity: 1000,
                ..CacheConfig::default()
            },
        }
    }
}

/// Query for `/image` and `/cached`
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: String,
    #[serde(default)]
    pub refresh: bool,
}

/// Response for `/cached`
#[derive(Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub cached: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Content type for a URL's file extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Content type recognized from the leading bytes of an image
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    let text_start = data.trim_ascii_start();
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.len() >= 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"avif" {
        Some("image/avif")
    } else if data.starts_with(b"BM") {
        Some("image/bmp")
    } else if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some("image/x-icon")
    } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else if text_start.starts_with(b"<svg") || text_start.starts_with(b"<?xml") {
        Some("image/svg+xml")
    } else {
        None
    }
}
