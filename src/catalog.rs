//! Composition root
//!
//! Builds every service from a [`Config`], wires them together and exposes the
//! operations the presentation layer calls. Every mutation recomputes the
//! catalog before returning, so callers observe their own writes.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregate::{Aggregator, CatalogCounts, CatalogSnapshot, RecomputeReport};
use crate::config::Config;
use crate::feed::{presets_to_document, BundledSource, ParseError, LEGACY_SCHEMA_VERSION};
use crate::migration::{LegacyRemoteFeedMigration, MigrationDetector, MigrationError, MigrationRunner};
use crate::preset::PresetRecord;
use crate::storage::{CustomPresetStore, FavoriteStore, FeedStore, StoreError, DATABASE_FILE};
use crate::subscription::{DefaultSubscription, RegistryError, SubscriptionEntry, SubscriptionRegistry};
use crate::sync::{CancelFlag, FeedFetcher, RefreshSummary, SyncError, SyncOutcome, Synchronizer};

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Export failed: {0}")]
    Export(#[from] ParseError),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
}

/// Subscription added, with the result of its first sync.
#[derive(Debug)]
pub struct AddOutcome {
    pub entry: SubscriptionEntry,
    pub sync: Result<SyncOutcome, SyncError>,
}

/// Which presets an export contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportScope {
    #[default]
    All,
    Favorites,
    Custom,
}

/// The preset catalog and everything it is built from.
pub struct Catalog {
    config: Config,
    feeds: Arc<FeedStore>,
    registry: Arc<SubscriptionRegistry>,
    favorites: Arc<FavoriteStore>,
    custom: Arc<CustomPresetStore>,
    aggregator: Arc<Aggregator>,
    synchronizer: Synchronizer,
    detector: MigrationDetector,
    migrations: MigrationRunner,
    aggregator_task: Option<JoinHandle<()>>,
}

impl Catalog {
    /// Open every store under the configured data dir and publish the first snapshot.
    ///
    /// When called inside a tokio runtime the aggregator loop is spawned, so
    /// changes made through the stores directly are picked up too.
    pub fn open(config: Config, fetcher: Arc<dyn FeedFetcher>) -> Result<Self, CatalogError> {
        let data_dir = config.catalog.data_dir.clone();
        let db_path = data_dir.join(DATABASE_FILE);
        info!(data_dir = %data_dir.display(), "Opening preset catalog");

        let default_url = config.catalog.default_subscription_url.clone();
        let default = default_url.as_ref().map(|url| DefaultSubscription {
            url: url.clone(),
            display_name: config.catalog.default_subscription_name.clone(),
        });

        let feeds = Arc::new(FeedStore::new(&data_dir));
        let registry = Arc::new(SubscriptionRegistry::open(&db_path, feeds.clone(), default.as_ref())?);
        let favorites = Arc::new(FavoriteStore::open(&db_path)?);
        let custom = Arc::new(CustomPresetStore::open(&db_path)?);

        let bundled = match &config.catalog.bundled_feed {
            Some(path) => BundledSource::File(path.clone()),
            None => BundledSource::default(),
        };

        let aggregator = Arc::new(Aggregator::new(
            registry.clone(),
            feeds.clone(),
            custom.clone(),
            favorites.clone(),
            bundled,
            default_url.clone(),
        ));

        let synchronizer = Synchronizer::new(
            registry.clone(),
            feeds.clone(),
            aggregator.clone(),
            fetcher,
            &config.sync,
        );

        let detector = MigrationDetector::new(feeds.clone());
        let migrations = MigrationRunner::open(
            &db_path,
            vec![Box::new(LegacyRemoteFeedMigration::new(feeds.clone(), default_url))],
        )?;

        if detector.detect_legacy_artifact() {
            if config.migration.auto_run {
                let ran = migrations.run_pending()?;
                info!(?ran, "Migrations run at startup");
                detector.detect_legacy_artifact();
            } else {
                aggregator.force_schema_version(Some(LEGACY_SCHEMA_VERSION));
            }
        }

        let report = aggregator.recompute();
        log_failures(&report);

        let aggregator_task = tokio::runtime::Handle::try_current()
            .ok()
            .map(|rt| rt.spawn(aggregator.clone().run()));

        Ok(Self {
            config,
            feeds,
            registry,
            favorites,
            custom,
            aggregator,
            synchronizer,
            detector,
            migrations,
            aggregator_task,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.aggregator.current()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<CatalogSnapshot>> {
        self.aggregator.subscribe()
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn get(&self, id: &str) -> Option<PresetRecord> {
        self.aggregator.get_by_id(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<PresetRecord> {
        self.aggregator.get_by_name(name)
    }

    pub fn favorites(&self) -> Vec<PresetRecord> {
        self.aggregator.favorites()
    }

    pub fn custom_presets(&self) -> Vec<PresetRecord> {
        self.aggregator.custom()
    }

    pub fn counts(&self) -> CatalogCounts {
        self.aggregator.counts()
    }

    pub fn subscriptions(&self) -> Arc<Vec<SubscriptionEntry>> {
        self.registry.list()
    }

    /// Rebuild the catalog now.
    pub fn recompute(&self) -> RecomputeReport {
        let report = self.aggregator.recompute();
        log_failures(&report);
        report
    }

    /// Add (or rename) a subscription and sync it right away.
    ///
    /// A failed first sync keeps the subscription; it is reported in the outcome.
    pub async fn add_subscription(&self, url: &str, display_name: &str) -> Result<AddOutcome, CatalogError> {
        let entry = self.registry.add(url, display_name).await?;
        let sync = self.synchronizer.sync(&entry.url).await;
        if let Err(e) = &sync {
            warn!(url = %entry.url, error = %e, "First sync failed");
        }
        self.recompute();

        let entry = self.registry.get(&entry.url).unwrap_or(entry);
        Ok(AddOutcome { entry, sync })
    }

    /// Remove a subscription, its cached feed and its presets.
    pub async fn remove_subscription(&self, url: &str) -> Result<bool, CatalogError> {
        let removed = self.registry.remove(url).await?;
        self.aggregator.invalidate(url);
        self.recompute();
        Ok(removed)
    }

    /// Flip a subscription. Enabling one that was never synced syncs it.
    pub async fn toggle_subscription(&self, url: &str) -> Result<SubscriptionEntry, CatalogError> {
        let mut entry = self.registry.toggle(url).await?;

        let is_default = self.config.catalog.default_subscription_url.as_deref() == Some(url);
        if entry.enabled && !is_default && !self.feeds.exists(url) {
            match self.synchronizer.sync(url).await {
                Ok(_) => entry = self.registry.get(url).unwrap_or(entry),
                Err(e) => warn!(url, error = %e, "Sync after enabling failed"),
            }
        }

        self.recompute();
        Ok(entry)
    }

    pub async fn sync_subscription(&self, url: &str) -> Result<SyncOutcome, CatalogError> {
        let outcome = self.synchronizer.sync(url).await;
        self.recompute();
        Ok(outcome?)
    }

    /// Refresh every enabled subscription.
    pub async fn refresh_all(&self, cancel: &CancelFlag) -> RefreshSummary {
        let summary = self.synchronizer.refresh_all(cancel).await;
        self.recompute();
        info!("{}", summary);
        summary
    }

    /// Flip the favorite state of a preset, returning the new state.
    pub fn toggle_favorite(&self, preset_id: &str) -> Result<bool, CatalogError> {
        if self.aggregator.get_by_id(preset_id).is_none() {
            return Err(CatalogError::UnknownPreset(preset_id.to_string()));
        }
        let favorite = self.favorites.toggle(preset_id)?;
        self.recompute();
        Ok(favorite)
    }

    pub fn add_custom_preset(&self, preset: PresetRecord) -> Result<PresetRecord, CatalogError> {
        let stored = self.custom.add(preset)?;
        self.recompute();
        Ok(stored)
    }

    pub fn update_custom_preset(&self, preset: PresetRecord) -> Result<bool, CatalogError> {
        let updated = self.custom.update(preset)?;
        if updated {
            self.recompute();
        }
        Ok(updated)
    }

    /// Delete a user-authored preset together with its favorite mark.
    pub fn delete_custom_preset(&self, id: &str) -> Result<bool, CatalogError> {
        let deleted = self.custom.delete(id)?;
        if deleted {
            self.favorites.remove(id)?;
            self.recompute();
        }
        Ok(deleted)
    }

    /// True while the legacy artifact is present and its migration has not run.
    pub fn legacy_migration_pending(&self) -> bool {
        self.detector.legacy_detected()
    }

    /// Run pending migrations, clear the legacy flag and republish.
    pub fn complete_legacy_migration(&self) -> Result<Vec<&'static str>, CatalogError> {
        let ran = self.migrations.run_pending()?;
        if self.detector.detect_legacy_artifact() {
            // already recorded as migrated, the file reappeared
            self.detector.delete_legacy_artifact()?;
        }
        self.aggregator.force_schema_version(None);
        self.aggregator.invalidate_all();
        self.recompute();
        info!(?ran, "Legacy migration completed");
        Ok(ran)
    }

    /// Serialize the current catalog (or part of it) to the feed format.
    pub fn export_document(&self, scope: ExportScope) -> Result<Vec<u8>, CatalogError> {
        let snapshot = self.snapshot();
        let presets: Vec<PresetRecord> = match scope {
            ExportScope::All => snapshot.presets.clone(),
            ExportScope::Favorites => self.favorites(),
            ExportScope::Custom => self.custom_presets(),
        };
        Ok(presets_to_document(snapshot.schema_version, &presets)?)
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        if let Some(task) = self.aggregator_task.take() {
            task.abort();
        }
    }
}

fn log_failures(report: &RecomputeReport) {
    for failure in &report.failures {
        warn!(source = %failure.source, error = %failure.error, "Source left out of catalog");
    }
}
