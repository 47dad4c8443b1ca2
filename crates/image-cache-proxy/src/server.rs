//! HTTP server for the image cache proxy
//!
//! Provides /health, /image, /cached and DELETE /cache endpoints.

use crate::types::{
    content_type_for, sniff_content_type, CachedResponse, ErrorResponse, HealthResponse,
    ImageQuery,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Utc};
use image_cache::{extension_hint, CacheError, ImageCache, Resolved};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: ImageCache,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: ImageCache) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/image", get(get_image))
        .route("/cached", get(get_cached))
        .route("/cache", delete(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

/// Serve an image from the cache, fetching it on a miss
async fn get_image(State(state): State<SharedState>, Query(query): Query<ImageQuery>) -> Response {
    match state.cache.load(&query.url, query.refresh).await {
        Ok((data, resolved)) => {
            let content_type = content_type_of(&query.url, &data, &resolved);
            let cache_header = if resolved.from_cache() { "HIT" } else { "MISS" };

            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                    (HeaderName::from_static("x-cache"), cache_header.to_string()),
                ],
                data,
            )
                .into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            if e.is_fetch_error() {
                warn!(url = %query.url, error = %e, "Failed to fetch image");
            } else {
                error!(url = %query.url, error = %e, "Failed to serve image");
            }
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Report whether a URL is on disk without fetching it
async fn get_cached(
    State(state): State<SharedState>,
    Query(query): Query<ImageQuery>,
) -> Json<CachedResponse> {
    let cached = state.cache.is_cached(&query.url).await;
    Json(CachedResponse {
        url: query.url,
        cached,
    })
}

/// Drop every cached image
async fn clear_cache(State(state): State<SharedState>) -> Response {
    match state.cache.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to clear cache");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Upstream header on a fresh fetch, else the bytes themselves, else the
/// URL's own extension. The key's fallback extension is never trusted.
fn content_type_of(url: &str, data: &[u8], resolved: &Resolved) -> String {
    if let Some(content_type) = &resolved.content_type {
        return content_type.clone();
    }
    if let Some(sniffed) = sniff_content_type(data) {
        return sniffed.to_string();
    }
    extension_hint(url)
        .map(|ext| content_type_for(&ext))
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn status_for(err: &CacheError) -> StatusCode {
    match err {
        CacheError::Status(404) | CacheError::Status(410) => StatusCode::NOT_FOUND,
        CacheError::Status(_) | CacheError::Transport(_) => StatusCode::BAD_GATEWAY,
        CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CacheError::Io(_) | CacheError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use image_cache::{BoxFuture, CacheConfig, FetchResponse, RemoteFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tower::ServiceExt;

    const OWL: &str = "https://example.com/owl.png";
    const MISSING: &str = "https://example.com/missing.png";
    /// No extension; the body and header say PNG
    const GENERATED: &str = "https://example.com/render/png";
    const OPAQUE: &str = "https://example.com/blob";

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Answers 404 for paths containing "missing", PNG for "render" paths,
    /// otherwise fixed untyped bytes
    #[derive(Clone, Default)]
    struct StubFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl RemoteFetcher for StubFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, image_cache::Result<FetchResponse>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let status = if url.contains("missing") { 404 } else { 200 };
                let response = if url.contains("render") {
                    FetchResponse {
                        status,
                        content_type: Some("image/png".to_string()),
                        body: PNG_BYTES.to_vec(),
                    }
                } else {
                    FetchResponse {
                        status,
                        content_type: None,
                        body: b"owl bytes".to_vec(),
                    }
                };
                Ok(response)
            })
        }
    }

    async fn create_test_state(dir: &tempfile::TempDir, fetcher: StubFetcher) -> SharedState {
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            capacity: 4,
            ..CacheConfig::default()
        };
        let cache = ImageCache::with_fetcher(&config, fetcher);
        cache.init().await.unwrap();
        Arc::new(ServerState::new(cache))
    }

    fn image_uri(url: &str) -> String {
        format!("/image?url={}", url)
    }

    async fn send(router: &Router, method: Method, uri: &str) -> Response {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(&dir, StubFetcher::default()).await);

        let response = send(&router, Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["cache"]["entries"], 0);
        assert_eq!(json["cache"]["capacity"], 4);
    }

    #[tokio::test]
    async fn test_image_miss_then_hit() {
        let dir = tempdir().unwrap();
        let fetcher = StubFetcher::default();
        let router = create_router(create_test_state(&dir, fetcher.clone()).await);

        let response = send(&router, Method::GET, &image_uri(OWL)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"owl bytes");

        let response = send(&router, Method::GET, &image_uri(OWL)).await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_content_type_without_url_extension() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(&dir, StubFetcher::default()).await);

        // Upstream header on the miss, sniffed bytes on the hit
        let response = send(&router, Method::GET, &image_uri(GENERATED)).await;
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let response = send(&router, Method::GET, &image_uri(GENERATED)).await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        // Nothing to go on: not the key's jpg fallback
        let response = send(&router, Method::GET, &image_uri(OPAQUE)).await;
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_image_refresh_refetches() {
        let dir = tempdir().unwrap();
        let fetcher = StubFetcher::default();
        let router = create_router(create_test_state(&dir, fetcher.clone()).await);

        send(&router, Method::GET, &image_uri(OWL)).await;
        let refresh_uri = format!("{}&refresh=true", image_uri(OWL));
        let response = send(&router, Method::GET, &refresh_uri).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_image_upstream_not_found() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(&dir, StubFetcher::default()).await);

        let response = send(&router, Method::GET, &image_uri(MISSING)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_image_requires_url() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(&dir, StubFetcher::default()).await);

        let response = send(&router, Method::GET, "/image").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cached_and_clear() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir, StubFetcher::default()).await;
        let router = create_router(state.clone());

        send(&router, Method::GET, &image_uri(OWL)).await;

        let response = send(&router, Method::GET, &format!("/cached?url={}", OWL)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let cached: CachedResponse = serde_json::from_slice(&body).unwrap();
        assert!(cached.cached);
        assert_eq!(cached.url, OWL);

        let response = send(&router, Method::DELETE, "/cache").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.cache.is_cached(OWL).await);
        assert_eq!(state.cache.size().await, 0);
    }

    #[test]
    fn test_status_for_errors() {
        assert_eq!(status_for(&CacheError::Status(404)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&CacheError::Status(500)), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&CacheError::Timeout(std::time::Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&CacheError::Task("panicked".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_server_state_new() {
        let dir = tempdir().unwrap();
        let state = create_test_state(&dir, StubFetcher::default()).await;

        // started_at should be close to now
        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!((0..5).contains(&diff));
    }
}
