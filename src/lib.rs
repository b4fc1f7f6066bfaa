//! preset-catalog: preset aggregation and subscription sync engine
//!
//! Merges color-grading presets from three kinds of sources into one ordered,
//! de-duplicated catalog:
//! - The bundled feed shipped with the app, or the cached copy of its remote
//!   counterpart (the default subscription)
//! - Remote subscription feeds, cached on disk one file per URL
//! - User-authored presets
//!
//! Favorite state is overlaid at read time. Snapshots are immutable and published
//! through `tokio::sync::watch`.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod feed;
pub mod migration;
pub mod preset;
pub mod storage;
pub mod subscription;
pub mod sync;

pub use aggregate::{Aggregator, CatalogSnapshot, RecomputeReport};
pub use catalog::{AddOutcome, Catalog, CatalogError, ExportScope};
pub use config::Config;
pub use preset::{PresetRecord, SourceTag};
pub use subscription::{SubscriptionEntry, SubscriptionRegistry};
pub use sync::{CancelFlag, FeedFetcher, FetchError, HttpFetcher, RefreshSummary, Synchronizer};
