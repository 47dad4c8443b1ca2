//! Image Cache Proxy - caching HTTP front end for remote images
//!
//! Fetches images by URL, keeps up to a fixed number of them on disk with
//! least-recently-used eviction, and serves repeat requests from disk.

mod error;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use image_cache::ImageCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("image_cache_proxy=info".parse()?)
        .add_directive("image_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Image Cache Proxy...");

    // Load configuration from environment
    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.cache_dir);
    info!("Cache capacity: {} entries", config.cache.capacity);
    info!("Fetch timeout: {:?}", config.cache.fetch_timeout);

    let cache = ImageCache::new(&config.cache)?;
    cache.init().await?;

    let state: SharedState = Arc::new(ServerState::new(cache));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache.cache_dir);

    let capacity = std::env::var("CACHE_CAPACITY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(defaults.cache.capacity);
    if capacity == 0 {
        return Err(ProxyError::Config(
            "CACHE_CAPACITY must be positive".to_string(),
        ));
    }

    let fetch_timeout = std::env::var("FETCH_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.cache.fetch_timeout);

    let max_redirects = std::env::var("MAX_REDIRECTS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(defaults.cache.max_redirects);

    let user_agent = std::env::var("USER_AGENT").unwrap_or(defaults.cache.user_agent);

    Ok(ProxyConfig {
        port,
        cache: image_cache::CacheConfig {
            cache_dir,
            capacity,
            fetch_timeout,
            max_redirects,
            user_agent,
        },
    })
}
