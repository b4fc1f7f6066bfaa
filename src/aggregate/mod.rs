//! Preset aggregator
//!
//! Merges the bundled feed (or the cached default subscription replacing it),
//! every other enabled subscription in registry order, and user-authored presets
//! into one catalog snapshot. Snapshots are immutable and published by
//! replacement through a `watch` channel.
//!
//! Parsed feeds are memoized per source. A source is only re-parsed after an
//! explicit [`Aggregator::invalidate`] (issued after a sync or a removal).

pub mod merge;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::feed::{self, BundledSource, ParseError, ParsedFeed, CURRENT_SCHEMA_VERSION};
use crate::preset::{PresetRecord, SourceTag};
use crate::storage::{lock, CustomPresetStore, FavoriteStore, FeedStore};
use crate::subscription::SubscriptionRegistry;

/// One published catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    /// Increases by one on every publish
    pub generation: u64,

    /// Effective schema version of the default source
    pub schema_version: u32,

    /// Merged, de-duplicated, favorite-overlaid presets
    pub presets: Vec<PresetRecord>,
}

impl CatalogSnapshot {
    pub fn get(&self, id: &str) -> Option<&PresetRecord> {
        self.presets.iter().find(|p| p.id() == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PresetRecord> {
        self.presets.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// Per-bucket preset counts of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub total: usize,
    pub bundled: usize,
    pub subscription: usize,
    pub custom: usize,
    pub favorites: usize,
}

/// Why a source contributed nothing to a recompute.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Failed to read feed: {0}")]
    Read(String),
}

/// A source excluded from one recompute.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: SourceTag,
    pub error: SourceError,
}

/// Outcome of one recompute.
#[derive(Debug, Clone, Default)]
pub struct RecomputeReport {
    pub generation: u64,
    pub preset_count: usize,
    pub duplicates_dropped: usize,
    pub failures: Vec<SourceFailure>,
}

impl RecomputeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FeedKey {
    Bundled,
    Cached(String),
}

/// Memoized parses. `epoch` moves on every invalidation; a parse started
/// before an invalidation is never stored.
#[derive(Default)]
struct Memo {
    feeds: HashMap<FeedKey, Arc<ParsedFeed>>,
    epoch: u64,
}

impl Memo {
    fn lookup(&self, key: &FeedKey) -> Result<Arc<ParsedFeed>, u64> {
        self.feeds.get(key).cloned().ok_or(self.epoch)
    }

    fn store(&mut self, key: FeedKey, feed: Arc<ParsedFeed>, read_epoch: u64) {
        if self.epoch == read_epoch {
            self.feeds.insert(key, feed);
        }
    }

    fn invalidate(&mut self, key: Option<&FeedKey>) {
        self.epoch += 1;
        match key {
            Some(key) => {
                self.feeds.remove(key);
            }
            None => self.feeds.clear(),
        }
    }
}

/// Builds and publishes catalog snapshots.
pub struct Aggregator {
    registry: Arc<SubscriptionRegistry>,
    feeds: Arc<FeedStore>,
    custom: Arc<CustomPresetStore>,
    favorites: Arc<FavoriteStore>,
    bundled: BundledSource,
    default_url: Option<String>,

    memo: Mutex<Memo>,
    schema_override: Mutex<Option<u32>>,
    recompute_lock: Mutex<()>,
    generation: AtomicU64,

    tx: watch::Sender<Arc<CatalogSnapshot>>,
    invalidate_tx: mpsc::UnboundedSender<()>,
    invalidate_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        feeds: Arc<FeedStore>,
        custom: Arc<CustomPresetStore>,
        favorites: Arc<FavoriteStore>,
        bundled: BundledSource,
        default_url: Option<String>,
    ) -> Self {
        let initial = CatalogSnapshot {
            generation: 0,
            schema_version: CURRENT_SCHEMA_VERSION,
            presets: Vec::new(),
        };
        let (tx, _) = watch::channel(Arc::new(initial));
        let (invalidate_tx, invalidate_rx) = mpsc::unbounded_channel();

        Self {
            registry,
            feeds,
            custom,
            favorites,
            bundled,
            default_url,
            memo: Mutex::new(Memo::default()),
            schema_override: Mutex::new(None),
            recompute_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            tx,
            invalidate_tx,
            invalidate_rx: Mutex::new(Some(invalidate_rx)),
        }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> Arc<CatalogSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CatalogSnapshot>> {
        self.tx.subscribe()
    }

    /// Drop the memoized parse of one subscription's cached feed and ask the
    /// background loop to recompute.
    pub fn invalidate(&self, url: &str) {
        lock(&self.memo).invalidate(Some(&FeedKey::Cached(url.to_string())));
        debug!(url, "Feed invalidated");
        let _ = self.invalidate_tx.send(());
    }

    /// Drop every memoized parse, the bundled feed included.
    pub fn invalidate_all(&self) {
        lock(&self.memo).invalidate(None);
        debug!("All feeds invalidated");
        let _ = self.invalidate_tx.send(());
    }

    /// Force the reported schema version (the legacy flag), or clear the override.
    pub fn force_schema_version(&self, version: Option<u32>) {
        *lock(&self.schema_override) = version;
        let _ = self.invalidate_tx.send(());
    }

    pub fn schema_override(&self) -> Option<u32> {
        *lock(&self.schema_override)
    }

    /// Rebuild the catalog from every source and publish it.
    ///
    /// Never fails as a whole: a source that cannot be read or parsed is left
    /// out and reported in the returned [`RecomputeReport`].
    pub fn recompute(&self) -> RecomputeReport {
        let _guard = lock(&self.recompute_lock);

        let subscriptions = self.registry.list();
        let mut failures = Vec::new();
        let mut presets = Vec::new();
        let mut default_version = None;

        // A missing default entry counts as enabled
        let default_enabled = match &self.default_url {
            Some(url) => subscriptions
                .iter()
                .find(|e| &e.url == url)
                .map_or(true, |e| e.enabled),
            None => true,
        };

        if default_enabled {
            if let Some(feed) = self.default_feed(&mut failures) {
                default_version = Some(feed.version);
                presets.extend(feed.records.iter().cloned());
            }
        } else {
            debug!("Default subscription disabled, bundled presets excluded");
        }

        for entry in subscriptions.iter().filter(|e| e.enabled) {
            if Some(&entry.url) == self.default_url.as_ref() {
                continue;
            }
            match self.cached_feed(&entry.url, SourceTag::Subscription(entry.url.clone())) {
                Ok(Some(feed)) => presets.extend(merge::namespace_records(&entry.url, &feed.records)),
                Ok(None) => debug!(url = %entry.url, "Subscription not synced yet"),
                Err(error) => {
                    warn!(url = %entry.url, error = %error, "Excluding subscription from catalog");
                    failures.push(SourceFailure {
                        source: SourceTag::Subscription(entry.url.clone()),
                        error,
                    });
                }
            }
        }

        presets.extend(self.custom.list().iter().cloned());

        let (mut presets, duplicates_dropped) = merge::dedup_by_id(presets);
        merge::overlay_favorites(&mut presets, &self.favorites.ids());

        let schema_version = self
            .schema_override()
            .or(default_version)
            .unwrap_or(CURRENT_SCHEMA_VERSION);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let preset_count = presets.len();

        self.tx.send_replace(Arc::new(CatalogSnapshot {
            generation,
            schema_version,
            presets,
        }));

        info!(
            generation,
            presets = preset_count,
            schema_version,
            failures = failures.len(),
            "Catalog published"
        );

        RecomputeReport {
            generation,
            preset_count,
            duplicates_dropped,
            failures,
        }
    }

    /// Cached default feed when present and valid, otherwise the bundle.
    fn default_feed(&self, failures: &mut Vec<SourceFailure>) -> Option<Arc<ParsedFeed>> {
        if let Some(url) = &self.default_url {
            // Same tag as the bundle so ids survive the replacement
            match self.cached_feed(url, SourceTag::Bundled) {
                Ok(Some(feed)) => return Some(feed),
                Ok(None) => {}
                Err(error) => {
                    warn!(url = %url, error = %error, "Cached default feed unusable, using bundle");
                    failures.push(SourceFailure {
                        source: SourceTag::Subscription(url.clone()),
                        error,
                    });
                }
            }
        }

        match self.bundled_feed() {
            Ok(feed) => Some(feed),
            Err(error) => {
                warn!(error = %error, "Bundled feed unusable");
                failures.push(SourceFailure {
                    source: SourceTag::Bundled,
                    error,
                });
                None
            }
        }
    }

    fn bundled_feed(&self) -> Result<Arc<ParsedFeed>, SourceError> {
        let read_epoch = match lock(&self.memo).lookup(&FeedKey::Bundled) {
            Ok(feed) => return Ok(feed),
            Err(epoch) => epoch,
        };

        let bytes = self
            .bundled
            .load()
            .map_err(|e| SourceError::Read(e.to_string()))?;
        let feed = Arc::new(feed::parse(&bytes, &SourceTag::Bundled)?);
        lock(&self.memo).store(FeedKey::Bundled, feed.clone(), read_epoch);
        Ok(feed)
    }

    fn cached_feed(&self, url: &str, source: SourceTag) -> Result<Option<Arc<ParsedFeed>>, SourceError> {
        let key = FeedKey::Cached(url.to_string());
        let read_epoch = match lock(&self.memo).lookup(&key) {
            Ok(feed) => return Ok(Some(feed)),
            Err(epoch) => epoch,
        };

        let Some(bytes) = self
            .feeds
            .read(url)
            .map_err(|e| SourceError::Read(e.to_string()))?
        else {
            return Ok(None);
        };

        let feed = Arc::new(feed::parse(&bytes, &source)?);
        lock(&self.memo).store(key, feed.clone(), read_epoch);
        Ok(Some(feed))
    }

    /// Look a preset up by id in the current snapshot, then among user-authored presets.
    pub fn get_by_id(&self, id: &str) -> Option<PresetRecord> {
        let found = self
            .current()
            .get(id)
            .cloned()
            .or_else(|| self.custom.get(id));
        found.map(|p| self.with_favorite(p))
    }

    /// First preset with this display name, same resolution order as [`Self::get_by_id`].
    pub fn get_by_name(&self, name: &str) -> Option<PresetRecord> {
        let found = self
            .current()
            .find_by_name(name)
            .cloned()
            .or_else(|| self.custom.list().iter().find(|p| p.name == name).cloned());
        found.map(|p| self.with_favorite(p))
    }

    fn with_favorite(&self, mut preset: PresetRecord) -> PresetRecord {
        preset.is_favorite = self.favorites.is_favorite(preset.id());
        preset
    }

    /// Favorite presets of the current snapshot, in catalog order.
    pub fn favorites(&self) -> Vec<PresetRecord> {
        self.current()
            .presets
            .iter()
            .filter(|p| p.is_favorite)
            .cloned()
            .collect()
    }

    /// User-authored presets of the current snapshot.
    pub fn custom(&self) -> Vec<PresetRecord> {
        self.current()
            .presets
            .iter()
            .filter(|p| p.is_custom())
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> CatalogCounts {
        let snapshot = self.current();
        let mut counts = CatalogCounts {
            total: snapshot.len(),
            ..Default::default()
        };
        for preset in &snapshot.presets {
            match preset.source {
                SourceTag::Bundled => counts.bundled += 1,
                SourceTag::Subscription(_) => counts.subscription += 1,
                SourceTag::UserAuthored => counts.custom += 1,
            }
            if preset.is_favorite {
                counts.favorites += 1;
            }
        }
        counts
    }

    /// Recompute whenever an upstream source changes or an invalidation arrives.
    ///
    /// Only one loop may run per aggregator; a second call returns immediately.
    pub async fn run(self: Arc<Self>) {
        let receiver = lock(&self.invalidate_rx).take();
        let Some(mut invalidations) = receiver else {
            warn!("Aggregator loop already running");
            return;
        };

        let mut registry_rx = self.registry.subscribe();
        let mut favorites_rx = self.favorites.subscribe();
        let mut custom_rx = self.custom.subscribe();

        info!("Aggregator loop started");

        loop {
            tokio::select! {
                changed = registry_rx.changed() => {
                    if changed.is_err() { break; }
                    debug!("Subscription list changed");
                }
                changed = favorites_rx.changed() => {
                    if changed.is_err() { break; }
                    debug!("Favorites changed");
                }
                changed = custom_rx.changed() => {
                    if changed.is_err() { break; }
                    debug!("Custom presets changed");
                }
                signal = invalidations.recv() => {
                    if signal.is_none() { break; }
                    // coalesce bursts, e.g. a refresh of many subscriptions
                    while invalidations.try_recv().is_ok() {}
                }
            }

            let report = self.recompute();
            for failure in &report.failures {
                warn!(source = %failure.source, error = %failure.error, "Source excluded");
            }
        }

        info!("Aggregator loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DATABASE_FILE;
    use crate::subscription::DefaultSubscription;
    use tempfile::TempDir;

    const DEFAULT_URL: &str = "https://feeds.example/default.json";
    const BUNDLE: &str = r#"{"version": 2, "presets": [{"name": "Alpha"}, {"name": "Beta"}]}"#;

    struct Fixture {
        _dir: TempDir,
        registry: Arc<SubscriptionRegistry>,
        feeds: Arc<FeedStore>,
        custom: Arc<CustomPresetStore>,
        favorites: Arc<FavoriteStore>,
        aggregator: Aggregator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join(DATABASE_FILE);
        let feeds = Arc::new(FeedStore::new(dir.path()));
        let default = DefaultSubscription {
            url: DEFAULT_URL.into(),
            display_name: "Official".into(),
        };
        let registry = Arc::new(SubscriptionRegistry::open(&db, feeds.clone(), Some(&default)).unwrap());
        let custom = Arc::new(CustomPresetStore::open(&db).unwrap());
        let favorites = Arc::new(FavoriteStore::open(&db).unwrap());
        let aggregator = Aggregator::new(
            registry.clone(),
            feeds.clone(),
            custom.clone(),
            favorites.clone(),
            BundledSource::Bytes(BUNDLE.as_bytes().to_vec()),
            Some(DEFAULT_URL.into()),
        );
        Fixture {
            _dir: dir,
            registry,
            feeds,
            custom,
            favorites,
            aggregator,
        }
    }

    fn ids(snapshot: &CatalogSnapshot) -> Vec<String> {
        snapshot.presets.iter().map(|p| p.id().to_string()).collect()
    }

    #[test]
    fn test_bundle_only() {
        let f = fixture();
        let report = f.aggregator.recompute();
        assert!(report.is_clean());
        assert_eq!(report.generation, 1);

        let snapshot = f.aggregator.current();
        assert_eq!(ids(&snapshot), vec!["asset_alpha_0", "asset_beta_1"]);
        assert_eq!(snapshot.schema_version, 2);
    }

    #[test]
    fn test_parse_started_before_invalidation_is_not_stored() {
        let mut memo = Memo::default();
        let key = FeedKey::Cached("https://a.example/f.json".into());
        let stale = Arc::new(ParsedFeed {
            version: 1,
            records: Vec::new(),
            skipped: 0,
        });

        let read_epoch = memo.lookup(&key).unwrap_err();
        memo.invalidate(Some(&key));
        memo.store(key.clone(), stale.clone(), read_epoch);
        assert!(memo.lookup(&key).is_err());

        let read_epoch = memo.lookup(&key).unwrap_err();
        memo.store(key.clone(), stale, read_epoch);
        assert!(memo.lookup(&key).is_ok());
    }

    #[test]
    fn test_invalidate_racing_recompute_never_leaves_stale_feed() {
        let f = fixture();
        let url = "https://a.example/f.json";
        tokio_test_block(f.registry.add(url, "A")).unwrap();

        for round in 0..20usize {
            let mut presets = Vec::new();
            for i in 0..(round % 3 + 1) {
                presets.push(serde_json::json!({ "id": format!("r{}_{}", round, i), "name": "P" }));
            }
            let doc = serde_json::json!({ "version": 2, "presets": presets }).to_string();

            let stop = std::sync::atomic::AtomicBool::new(false);
            std::thread::scope(|s| {
                s.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        f.aggregator.recompute();
                    }
                });
                f.feeds.write(url, doc.as_bytes()).unwrap();
                f.aggregator.invalidate(url);
                stop.store(true, Ordering::SeqCst);
            });

            f.aggregator.recompute();
            let snapshot = f.aggregator.current();
            let subscribed = snapshot
                .presets
                .iter()
                .filter(|p| matches!(p.source, SourceTag::Subscription(_)))
                .count();
            assert_eq!(subscribed, round % 3 + 1, "round {}", round);
            assert!(snapshot
                .presets
                .iter()
                .any(|p| p.id().ends_with(&format!("r{}_0", round))));
        }
    }

    #[test]
    fn test_memoized_until_invalidated() {
        let f = fixture();
        let url = "https://a.example/f.json";
        tokio_test_block(f.registry.add(url, "A")).unwrap();
        f.feeds.write(url, br#"{"presets": [{"id": "one", "name": "One"}]}"#).unwrap();
        f.aggregator.recompute();
        assert_eq!(f.aggregator.current().len(), 3);

        f.feeds
            .write(url, br#"{"presets": [{"id": "one", "name": "One"}, {"id": "two", "name": "Two"}]}"#)
            .unwrap();
        f.aggregator.recompute();
        assert_eq!(f.aggregator.current().len(), 3, "served from memo");

        f.aggregator.invalidate(url);
        f.aggregator.recompute();
        assert_eq!(f.aggregator.current().len(), 4);
    }

    #[test]
    fn test_bad_feed_degrades_to_omission() {
        let f = fixture();
        let bad = "https://bad.example/f.json";
        let good = "https://good.example/f.json";
        tokio_test_block(f.registry.add(bad, "Bad")).unwrap();
        tokio_test_block(f.registry.add(good, "Good")).unwrap();
        f.feeds.write(bad, b"{ not json").unwrap();
        f.feeds.write(good, br#"{"presets": [{"name": "G"}]}"#).unwrap();

        let report = f.aggregator.recompute();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, SourceTag::Subscription(bad.into()));
        assert_eq!(f.aggregator.current().len(), 3);
    }

    #[test]
    fn test_favorites_overlay_and_views() {
        let f = fixture();
        f.favorites.add("asset_beta_1").unwrap();
        let mine = f
            .custom
            .add(PresetRecord::new("Mine", SourceTag::UserAuthored))
            .unwrap();
        f.aggregator.recompute();

        let favs = f.aggregator.favorites();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id(), "asset_beta_1");

        let custom = f.aggregator.custom();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].id(), mine.id());

        let counts = f.aggregator.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.bundled, 2);
        assert_eq!(counts.custom, 1);
        assert_eq!(counts.favorites, 1);
    }

    #[test]
    fn test_lookup_falls_back_to_custom_store() {
        let f = fixture();
        f.aggregator.recompute();
        let mine = f
            .custom
            .add(PresetRecord::new("Mine", SourceTag::UserAuthored))
            .unwrap();
        f.favorites.add(mine.id()).unwrap();

        // not recomputed yet, still resolvable
        let found = f.aggregator.get_by_id(mine.id()).unwrap();
        assert!(found.is_favorite);
        assert!(found.is_custom());
        assert_eq!(f.aggregator.get_by_name("Mine").unwrap().id(), mine.id());
        assert_eq!(f.aggregator.get_by_name("Alpha").unwrap().id(), "asset_alpha_0");
        assert!(f.aggregator.get_by_id("nope").is_none());
    }

    #[test]
    fn test_schema_override() {
        let f = fixture();
        f.aggregator.force_schema_version(Some(1));
        f.aggregator.recompute();
        assert_eq!(f.aggregator.current().schema_version, 1);

        f.aggregator.force_schema_version(None);
        f.aggregator.recompute();
        assert_eq!(f.aggregator.current().schema_version, 2);
    }

    #[test]
    fn test_corrupt_default_cache_falls_back_to_bundle() {
        let f = fixture();
        f.feeds.write(DEFAULT_URL, b"garbage").unwrap();
        let report = f.aggregator.recompute();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(ids(&f.aggregator.current()), vec!["asset_alpha_0", "asset_beta_1"]);
    }

    #[tokio::test]
    async fn test_run_loop_republishes_on_changes() {
        let f = fixture();
        let aggregator = Arc::new(f.aggregator);
        aggregator.recompute();
        let mut rx = aggregator.subscribe();
        rx.borrow_and_update();

        let handle = tokio::spawn(aggregator.clone().run());
        // let the loop subscribe before mutating
        tokio::task::yield_now().await;

        f.favorites.add("asset_alpha_0").unwrap();
        let published = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.get("asset_alpha_0").is_some_and(|p| p.is_favorite) {
                    break;
                }
            }
        })
        .await;
        assert!(published.is_ok());

        handle.abort();
    }

    fn tokio_test_block<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }
}
