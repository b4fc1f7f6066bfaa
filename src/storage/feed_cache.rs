//! On-disk feed cache
//!
//! Each subscription owns exactly one file, named from a hash of its URL, so
//! concurrent syncs of different subscriptions never touch the same path.
//! Writes go to a uniquely named `.download` sibling first and are renamed
//! into place, so overlapping writes of one URL never share a temp file.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::StoreError;

/// Directory (under the data dir) holding cached feeds.
pub const FEEDS_DIR: &str = "feeds";

/// Artifact left behind by the old single remote feed design.
pub const LEGACY_FEED_FILE: &str = "presets_remote.json";

/// Cached subscription feeds on disk.
#[derive(Debug, Clone)]
pub struct FeedStore {
    data_dir: PathBuf,
    feeds_dir: PathBuf,
}

impl FeedStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let feeds_dir = data_dir.join(FEEDS_DIR);
        Self {
            data_dir,
            feeds_dir,
        }
    }

    /// Cache file name for a URL.
    pub fn file_name_for(url: &str) -> String {
        let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
        format!("sub_{}.json", &digest[..16])
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.feeds_dir.join(Self::file_name_for(url))
    }

    pub fn exists(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Cached bytes for a URL, `None` when nothing was cached yet.
    pub fn read(&self, url: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.path_for(url)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the cached feed for a URL.
    pub fn write(&self, url: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.feeds_dir)?;

        let final_path = self.path_for(url);
        let download_path =
            final_path.with_extension(format!("json.{}.download", uuid::Uuid::new_v4().simple()));

        let mut file = std::fs::File::create(&download_path)?;
        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            drop(file);
            std::fs::remove_file(&download_path).ok();
            return Err(e.into());
        }
        drop(file);

        if let Err(e) = std::fs::rename(&download_path, &final_path) {
            std::fs::remove_file(&download_path).ok();
            return Err(e.into());
        }
        debug!(url, path = %final_path.display(), bytes = bytes.len(), "Cached feed written");
        Ok(final_path)
    }

    /// Remove the cached feed for a URL. Returns whether a file was removed.
    pub fn delete(&self, url: &str) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.path_for(url)) {
            Ok(()) => {
                info!(url, "Cached feed deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.data_dir.join(LEGACY_FEED_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_is_deterministic() {
        let a = FeedStore::file_name_for("https://a.example/feed.json");
        assert_eq!(a, FeedStore::file_name_for("https://a.example/feed.json"));
        assert_ne!(a, FeedStore::file_name_for("https://b.example/feed.json"));
        assert!(a.starts_with("sub_") && a.ends_with(".json"));
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = FeedStore::new(dir.path());
        let url = "https://a.example/feed.json";

        assert!(store.read(url).unwrap().is_none());
        assert!(!store.exists(url));

        store.write(url, b"{\"version\":2}").unwrap();
        assert!(store.exists(url));
        assert_eq!(store.read(url).unwrap().unwrap(), b"{\"version\":2}");

        store.write(url, b"{\"version\":3}").unwrap();
        assert_eq!(store.read(url).unwrap().unwrap(), b"{\"version\":3}");

        // no temp file left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(FEEDS_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".download"))
            .collect();
        assert!(leftovers.is_empty());

        assert!(store.delete(url).unwrap());
        assert!(!store.delete(url).unwrap());
        assert!(!store.exists(url));
    }

    #[test]
    fn test_concurrent_writes_of_one_url_never_mix() {
        let dir = TempDir::new().unwrap();
        let store = FeedStore::new(dir.path());
        let url = "https://a.example/feed.json";

        let payloads: Vec<Vec<u8>> = (0..8u8)
            .map(|i| vec![b'a' + i; 64 * 1024 + i as usize])
            .collect();

        for _ in 0..5 {
            std::thread::scope(|s| {
                for payload in &payloads {
                    let store = &store;
                    s.spawn(move || store.write(url, payload).unwrap());
                }
            });

            let cached = store.read(url).unwrap().unwrap();
            assert!(payloads.contains(&cached), "cached feed mixes two writes");
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(FEEDS_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".download"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
