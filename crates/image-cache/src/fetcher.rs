//! Remote transfer client

use crate::error::{CacheError, Result};
use crate::types::CacheConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, redirect, Client};
use std::time::Duration;
use tracing::debug;

/// Raw outcome of a remote fetch, before the cache judges the status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Media type announced by the remote, if any
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Something that can retrieve the bytes behind a URL.
///
/// Implementations report only transport failures as errors; any HTTP status
/// is returned as a [`FetchResponse`] and the cache decides what it means.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse>>;
}

/// HTTP fetcher backed by a shared `reqwest` client
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a client honoring the timeout, redirect and user agent settings
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let redirects = if config.max_redirects == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(config.max_redirects)
        };

        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .redirect(redirects)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            timeout: config.fetch_timeout,
        })
    }

    /// Client-side deadlines surface as [`CacheError::Timeout`], like the
    /// coordinator's own deadline
    fn request_error(&self, err: reqwest::Error) -> CacheError {
        if err.is_timeout() {
            CacheError::Timeout(self.timeout)
        } else {
            CacheError::from(err)
        }
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<FetchResponse>> {
        async move {
            debug!(url = %url, "Fetching remote resource");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| self.request_error(e))?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            let body = response
                .bytes()
                .await
                .map_err(|e| self.request_error(e))?
                .to_vec();

            debug!(url = %url, status, size = body.len(), "Fetched remote resource");
            Ok(FetchResponse {
                status,
                content_type,
                body,
            })
        }
        .boxed()
    }
}
