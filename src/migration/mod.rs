//! One-shot on-disk migrations
//!
//! Each migration knows how to detect its artifact, migrate what is worth
//! keeping and clean the artifact up. The runner records completed ids in the
//! `meta` table so a re-run does nothing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::feed;
use crate::preset::SourceTag;
use crate::storage::{get_meta, lock, now_millis, open_database, set_meta, FeedStore, StoreError};

const META_PREFIX: &str = "migration:";

/// Migration errors
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A versioned migration step.
pub trait Migration: Send + Sync {
    /// Stable id recorded once the migration completed
    fn id(&self) -> &'static str;

    /// Whether the artifact this migration handles is present
    fn detect(&self) -> bool;

    fn migrate(&self) -> Result<(), MigrationError>;

    fn cleanup_artifact(&self) -> Result<(), MigrationError>;
}

/// Moves the single remote feed of the old design into the default
/// subscription's cache slot, then deletes it.
pub struct LegacyRemoteFeedMigration {
    feeds: Arc<FeedStore>,
    default_url: Option<String>,
}

impl LegacyRemoteFeedMigration {
    pub const ID: &'static str = "legacy_remote_feed";

    pub fn new(feeds: Arc<FeedStore>, default_url: Option<String>) -> Self {
        Self { feeds, default_url }
    }
}

impl Migration for LegacyRemoteFeedMigration {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn detect(&self) -> bool {
        self.feeds.legacy_path().is_file()
    }

    fn migrate(&self) -> Result<(), MigrationError> {
        let Some(url) = &self.default_url else {
            debug!("No default subscription, legacy feed is only cleaned up");
            return Ok(());
        };
        if self.feeds.exists(url) {
            debug!(url = %url, "Default subscription already cached, legacy feed not copied");
            return Ok(());
        }

        let bytes = std::fs::read(self.feeds.legacy_path())?;
        match feed::parse(&bytes, &SourceTag::Bundled) {
            Ok(parsed) => {
                self.feeds.write(url, &bytes)?;
                info!(url = %url, presets = parsed.records.len(), "Legacy feed moved to default subscription cache");
            }
            Err(e) => warn!(error = %e, "Legacy feed is unreadable, discarding"),
        }
        Ok(())
    }

    fn cleanup_artifact(&self) -> Result<(), MigrationError> {
        match std::fs::remove_file(self.feeds.legacy_path()) {
            Ok(()) => {
                info!("Legacy feed deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs the migrations that have not completed yet.
pub struct MigrationRunner {
    db: Mutex<Connection>,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRunner {
    pub fn open(db_path: &Path, migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        let db = open_database(db_path)?;
        Ok(Self {
            db: Mutex::new(db),
            migrations,
        })
    }

    pub fn is_completed(&self, id: &str) -> Result<bool, MigrationError> {
        let db = lock(&self.db);
        Ok(get_meta(&db, &format!("{}{}", META_PREFIX, id))?.is_some())
    }

    /// Ids of migrations that are not recorded and whose artifact is present.
    pub fn pending(&self) -> Result<Vec<&'static str>, MigrationError> {
        let mut pending = Vec::new();
        for migration in &self.migrations {
            if !self.is_completed(migration.id())? && migration.detect() {
                pending.push(migration.id());
            }
        }
        Ok(pending)
    }

    /// Run every pending migration in order, returning the ids that ran.
    ///
    /// Stops at the first failure; completed steps stay recorded.
    pub fn run_pending(&self) -> Result<Vec<&'static str>, MigrationError> {
        let mut ran = Vec::new();

        for migration in &self.migrations {
            let id = migration.id();
            if self.is_completed(id)? {
                debug!(id, "Migration already completed");
                continue;
            }
            if !migration.detect() {
                debug!(id, "Nothing to migrate");
                continue;
            }

            info!(id, "Running migration");
            migration.migrate()?;
            migration.cleanup_artifact()?;

            let db = lock(&self.db);
            set_meta(&db, &format!("{}{}", META_PREFIX, id), &now_millis().to_string())?;
            ran.push(id);
        }

        Ok(ran)
    }
}

/// Startup check for the old single remote feed file.
pub struct MigrationDetector {
    feeds: Arc<FeedStore>,
    detected: AtomicBool,
}

impl MigrationDetector {
    pub fn new(feeds: Arc<FeedStore>) -> Self {
        Self {
            feeds,
            detected: AtomicBool::new(false),
        }
    }

    /// Check for the legacy artifact and remember the result.
    pub fn detect_legacy_artifact(&self) -> bool {
        let present = self.feeds.legacy_path().is_file();
        self.detected.store(present, Ordering::SeqCst);
        if present {
            info!(path = %self.feeds.legacy_path().display(), "Legacy feed detected, migration pending");
        }
        present
    }

    /// Result of the last detection.
    pub fn legacy_detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    /// Delete the artifact. Returns whether a file was removed.
    pub fn delete_legacy_artifact(&self) -> Result<bool, MigrationError> {
        let removed = match std::fs::remove_file(self.feeds.legacy_path()) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.detected.store(false, Ordering::SeqCst);
        Ok(removed)
    }
}
