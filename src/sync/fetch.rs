//! Network side of subscription sync

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

/// Network fetch errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Body exceeds {limit} bytes (at least {size})")]
    TooLarge { size: u64, limit: usize },

    #[error("Network error: {0}")]
    Network(String),
}

/// Fetches raw feed bytes from a URL.
///
/// Implementations must not buffer more than `max_bytes`; a larger body is
/// reported as [`FetchError::TooLarge`].
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Vec<u8>, FetchError>;
}

/// [`FeedFetcher`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("preset-catalog/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Vec<u8>, FetchError> {
        debug!(url, ?timeout, max_bytes, "Fetching feed");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        // Advertised length is only a hint, the stream is still capped below
        let advertised = response.content_length().unwrap_or(0);
        if advertised > max_bytes as u64 {
            warn!(url, advertised, max_bytes, "Feed rejected by Content-Length");
            return Err(FetchError::TooLarge {
                size: advertised,
                limit: max_bytes,
            });
        }

        let mut body = Vec::with_capacity((advertised as usize).min(max_bytes));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(e, timeout))?;
            if body.len() + chunk.len() > max_bytes {
                warn!(url, max_bytes, "Feed body exceeded limit, aborting");
                return Err(FetchError::TooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    limit: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "Feed fetched");
        Ok(body)
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(e.to_string())
    }
}
