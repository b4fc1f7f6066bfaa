//! Subscription registry
//!
//! Durable, ordered list of remote preset feeds. The registry is the single
//! writer for subscription metadata: every mutation runs under one lock, is
//! committed to SQLite, and only then is the full list published to watchers.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::storage::{get_meta, open_database, set_meta, FeedStore, StoreError};

const SEEDED_KEY: &str = "default_subscription_seeded";

/// A remote preset feed the user subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Feed URL, unique key
    pub url: String,

    /// Name shown to the user
    pub display_name: String,

    /// Disabled subscriptions contribute nothing to the catalog
    pub enabled: bool,

    /// Record count of the last successful sync
    pub preset_count: u32,

    /// Unix millis of the last successful sync, 0 if never synced
    pub last_synced_at: i64,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid subscription URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown subscription: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        RegistryError::Store(StoreError::Database(e))
    }
}

/// The subscription to seed on first launch.
#[derive(Debug, Clone)]
pub struct DefaultSubscription {
    pub url: String,
    pub display_name: String,
}

/// Durable, observable subscription list.
pub struct SubscriptionRegistry {
    db: Mutex<Connection>,
    feeds: Arc<FeedStore>,
    tx: watch::Sender<Arc<Vec<SubscriptionEntry>>>,
}

impl SubscriptionRegistry {
    /// Open the registry, seeding the default subscription once per data dir.
    pub fn open(
        db_path: &Path,
        feeds: Arc<FeedStore>,
        default: Option<&DefaultSubscription>,
    ) -> Result<Self, RegistryError> {
        let db = open_database(db_path)?;

        if let Some(default) = default {
            if get_meta(&db, SEEDED_KEY)?.is_none() {
                insert_entry(&db, &default.url, &default.display_name)?;
                set_meta(&db, SEEDED_KEY, &default.url)?;
                info!(url = %default.url, "Seeded default subscription");
            }
        }

        let entries = load_entries(&db)?;
        debug!(count = entries.len(), "Subscription registry opened");

        let (tx, _) = watch::channel(Arc::new(entries));
        Ok(Self {
            db: Mutex::new(db),
            feeds,
            tx,
        })
    }

    /// Current list in registry order.
    pub fn list(&self) -> Arc<Vec<SubscriptionEntry>> {
        self.tx.borrow().clone()
    }

    pub fn get(&self, url: &str) -> Option<SubscriptionEntry> {
        self.tx.borrow().iter().find(|e| e.url == url).cloned()
    }

    /// Watch the full list; a new value is published after every committed mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<SubscriptionEntry>>> {
        self.tx.subscribe()
    }

    /// Add a subscription. Re-adding a known URL only updates its display name.
    pub async fn add(&self, url: &str, display_name: &str) -> Result<SubscriptionEntry, RegistryError> {
        let url = normalize_url(url)?;
        let display_name = match display_name.trim() {
            "" => url.clone(),
            name => name.to_string(),
        };

        let db = self.db.lock().await;
        let exists: Option<String> = db
            .query_row(
                "SELECT url FROM subscriptions WHERE url = ?1",
                [&url],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_some() {
            db.execute(
                "UPDATE subscriptions SET display_name = ?2 WHERE url = ?1",
                params![url, display_name],
            )?;
            debug!(url = %url, "Subscription already present, name updated");
        } else {
            insert_entry(&db, &url, &display_name)?;
            info!(url = %url, name = %display_name, "Subscription added");
        }

        self.publish(&db)?;
        self.get(&url).ok_or(RegistryError::NotFound(url))
    }

    /// Remove a subscription and its cached feed.
    pub async fn remove(&self, url: &str) -> Result<bool, RegistryError> {
        let db = self.db.lock().await;
        let removed = db.execute("DELETE FROM subscriptions WHERE url = ?1", [url])?;

        if let Err(e) = self.feeds.delete(url) {
            warn!(url, error = %e, "Failed to delete cached feed");
        }

        if removed > 0 {
            self.publish(&db)?;
            info!(url, "Subscription removed");
        }
        Ok(removed > 0)
    }

    pub async fn set_enabled(&self, url: &str, enabled: bool) -> Result<SubscriptionEntry, RegistryError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE subscriptions SET enabled = ?2 WHERE url = ?1",
            params![url, enabled],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound(url.to_string()));
        }
        self.publish(&db)?;
        info!(url, enabled, "Subscription toggled");
        self.get(url).ok_or_else(|| RegistryError::NotFound(url.to_string()))
    }

    /// Flip the enabled flag, returning the updated entry.
    pub async fn toggle(&self, url: &str) -> Result<SubscriptionEntry, RegistryError> {
        let current = self
            .get(url)
            .ok_or_else(|| RegistryError::NotFound(url.to_string()))?;
        self.set_enabled(url, !current.enabled).await
    }

    /// Store the outcome of a successful sync.
    pub async fn record_sync_result(
        &self,
        url: &str,
        preset_count: u32,
        synced_at: i64,
    ) -> Result<SubscriptionEntry, RegistryError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE subscriptions SET preset_count = ?2, last_synced_at = ?3 WHERE url = ?1",
            params![url, preset_count, synced_at],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound(url.to_string()));
        }
        self.publish(&db)?;
        debug!(url, preset_count, synced_at, "Sync result recorded");
        self.get(url).ok_or_else(|| RegistryError::NotFound(url.to_string()))
    }

    fn publish(&self, db: &Connection) -> Result<(), RegistryError> {
        let entries = load_entries(db)?;
        self.tx.send_replace(Arc::new(entries));
        Ok(())
    }
}

fn normalize_url(url: &str) -> Result<String, RegistryError> {
    let trimmed = url.trim();
    let parsed =
        reqwest::Url::parse(trimmed).map_err(|_| RegistryError::InvalidUrl(trimmed.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(trimmed.to_string()),
        _ => Err(RegistryError::InvalidUrl(trimmed.to_string())),
    }
}

fn insert_entry(db: &Connection, url: &str, display_name: &str) -> Result<(), StoreError> {
    db.execute(
        "INSERT OR IGNORE INTO subscriptions (url, display_name, enabled, position)
         VALUES (?1, ?2, 1, (SELECT COALESCE(MAX(position), 0) + 1 FROM subscriptions))",
        params![url, display_name],
    )?;
    Ok(())
}

fn load_entries(db: &Connection) -> Result<Vec<SubscriptionEntry>, StoreError> {
    let mut stmt = db.prepare_cached(
        "SELECT url, display_name, enabled, preset_count, last_synced_at
         FROM subscriptions ORDER BY position",
    )?;
    let entries = stmt
        .query_map([], |row| {
            Ok(SubscriptionEntry {
                url: row.get(0)?,
                display_name: row.get(1)?,
                enabled: row.get(2)?,
                preset_count: row.get(3)?,
                last_synced_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
