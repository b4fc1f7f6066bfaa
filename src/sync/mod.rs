//! Subscription synchronizer
//!
//! Fetches a subscription feed, validates it, replaces the cached copy and
//! records the result in the registry. On any failure the previous cached feed
//! and the registry metadata stay untouched.

pub mod fetch;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::config::SyncConfig;
use crate::feed::{self, ParseError};
use crate::preset::SourceTag;
use crate::storage::{now_millis, FeedStore, StoreError};
use crate::subscription::{RegistryError, SubscriptionRegistry};

pub use fetch::{FeedFetcher, FetchError, HttpFetcher};

/// Sync errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid feed: {0}")]
    Parse(#[from] ParseError),

    #[error("Feed too large: {size} bytes (limit {limit})")]
    Oversize { size: usize, limit: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sync task failed: {0}")]
    Task(String),
}

/// Result of one successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub url: String,
    pub version: u32,
    pub preset_count: u32,
    pub skipped: usize,
    pub synced_at: i64,
}

/// Stops a refresh from dispatching further fetches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A subscription that failed during a refresh.
#[derive(Debug)]
pub struct RefreshFailure {
    pub url: String,
    pub error: SyncError,
}

/// Outcome of a refresh of every enabled subscription.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Syncs actually dispatched
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<RefreshFailure>,
    /// Not dispatched because the refresh was cancelled
    pub skipped: usize,
}

impl RefreshSummary {
    pub fn total(&self) -> usize {
        self.attempted + self.skipped
    }
}

impl fmt::Display for RefreshSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} subscriptions updated", self.succeeded, self.total())
    }
}

/// Syncs subscriptions against the network.
#[derive(Clone)]
pub struct Synchronizer {
    registry: Arc<SubscriptionRegistry>,
    feeds: Arc<FeedStore>,
    aggregator: Arc<Aggregator>,
    fetcher: Arc<dyn FeedFetcher>,
    timeout: Duration,
    max_concurrent: usize,
    max_feed_bytes: usize,
}

impl Synchronizer {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        feeds: Arc<FeedStore>,
        aggregator: Arc<Aggregator>,
        fetcher: Arc<dyn FeedFetcher>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            registry,
            feeds,
            aggregator,
            fetcher,
            timeout: Duration::from_millis(config.fetch_timeout_ms),
            max_concurrent: config.max_concurrent_fetches.max(1),
            max_feed_bytes: config.max_feed_bytes,
        }
    }

    /// Sync one subscription.
    pub async fn sync(&self, url: &str) -> Result<SyncOutcome, SyncError> {
        if self.registry.get(url).is_none() {
            return Err(RegistryError::NotFound(url.to_string()).into());
        }

        info!(url, "Syncing subscription");

        let bytes = match self
            .fetcher
            .fetch_bytes(url, self.timeout, self.max_feed_bytes)
            .await
        {
            Ok(bytes) => bytes,
            Err(FetchError::TooLarge { size, limit }) => {
                return Err(SyncError::Oversize {
                    size: usize::try_from(size).unwrap_or(usize::MAX),
                    limit,
                });
            }
            Err(e) => return Err(e.into()),
        };
        // fetchers are trusted to honor the limit, but not relied on
        if bytes.len() > self.max_feed_bytes {
            return Err(SyncError::Oversize {
                size: bytes.len(),
                limit: self.max_feed_bytes,
            });
        }

        // Structural validation only, ids are assigned again at merge time
        let parsed = feed::parse(&bytes, &SourceTag::Subscription(url.to_string()))?;
        if parsed.skipped > 0 {
            warn!(url, skipped = parsed.skipped, "Feed has entries without a name");
        }

        self.feeds.write(url, &bytes)?;

        let preset_count = u32::try_from(parsed.records.len()).unwrap_or(u32::MAX);
        let synced_at = now_millis();
        match self
            .registry
            .record_sync_result(url, preset_count, synced_at)
            .await
        {
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => {
                // removed while the fetch was in flight
                self.feeds.delete(url)?;
                return Err(RegistryError::NotFound(url.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        }

        self.aggregator.invalidate(url);

        info!(url, preset_count, version = parsed.version, "Subscription synced");
        Ok(SyncOutcome {
            url: url.to_string(),
            version: parsed.version,
            preset_count,
            skipped: parsed.skipped,
            synced_at,
        })
    }

    /// Sync every enabled subscription, at most `max_concurrent_fetches` at a time.
    ///
    /// Each sync runs in its own task, so a failure never stops the others and a
    /// fetch already dispatched finishes and is applied even if the caller stops
    /// waiting. Cancelling only prevents further dispatches.
    pub async fn refresh_all(&self, cancel: &CancelFlag) -> RefreshSummary {
        let targets: Vec<String> = self
            .registry
            .list()
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.url.clone())
            .collect();

        info!(count = targets.len(), "Refreshing subscriptions");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(targets.len());
        let mut skipped = 0;

        for url in targets {
            if cancel.is_cancelled() {
                skipped += 1;
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            // may have been cancelled while waiting for a slot
            if cancel.is_cancelled() {
                skipped += 1;
                continue;
            }

            let this = self.clone();
            let task_url = url.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                this.sync(&task_url).await
            });
            handles.push((url, handle));
        }

        let mut summary = RefreshSummary {
            attempted: handles.len(),
            skipped,
            ..Default::default()
        };

        for (url, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Task(e.to_string())),
            };
            match result {
                Ok(outcome) => {
                    debug!(url = %outcome.url, count = outcome.preset_count, "Refresh item done");
                    summary.succeeded += 1;
                }
                Err(error) => {
                    warn!(url = %url, error = %error, "Subscription refresh failed");
                    summary.failures.push(RefreshFailure { url, error });
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failures.len(),
            skipped = summary.skipped,
            "Refresh finished"
        );
        summary
    }
}
