//! Favorite preset ids

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::watch;
use tracing::debug;

use super::{lock, now_millis, open_database, StoreError};

/// Set of favorite preset ids, persisted in the catalog database.
///
/// Every mutation is committed before the new set is published to watchers.
pub struct FavoriteStore {
    db: Mutex<Connection>,
    tx: watch::Sender<Arc<HashSet<String>>>,
}

impl FavoriteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let db = open_database(db_path)?;
        let initial = load_ids(&db)?;
        debug!(count = initial.len(), "Favorites loaded");
        let (tx, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            db: Mutex::new(db),
            tx,
        })
    }

    /// Current favorite ids.
    pub fn ids(&self) -> Arc<HashSet<String>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<HashSet<String>>> {
        self.tx.subscribe()
    }

    pub fn is_favorite(&self, preset_id: &str) -> bool {
        self.tx.borrow().contains(preset_id)
    }

    /// Flip the favorite state, returning the new state.
    pub fn toggle(&self, preset_id: &str) -> Result<bool, StoreError> {
        let db = lock(&self.db);
        let removed = db.execute("DELETE FROM favorites WHERE preset_id = ?1", [preset_id])?;
        let now_favorite = removed == 0;
        if now_favorite {
            db.execute(
                "INSERT INTO favorites (preset_id, added_at) VALUES (?1, ?2)",
                rusqlite::params![preset_id, now_millis()],
            )?;
        }
        self.publish(&db)?;
        debug!(preset_id, now_favorite, "Favorite toggled");
        Ok(now_favorite)
    }

    pub fn add(&self, preset_id: &str) -> Result<(), StoreError> {
        let db = lock(&self.db);
        db.execute(
            "INSERT OR IGNORE INTO favorites (preset_id, added_at) VALUES (?1, ?2)",
            rusqlite::params![preset_id, now_millis()],
        )?;
        self.publish(&db)
    }

    pub fn remove(&self, preset_id: &str) -> Result<(), StoreError> {
        let db = lock(&self.db);
        let removed = db.execute("DELETE FROM favorites WHERE preset_id = ?1", [preset_id])?;
        if removed > 0 {
            self.publish(&db)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let db = lock(&self.db);
        db.execute("DELETE FROM favorites", [])?;
        self.publish(&db)
    }

    fn publish(&self, db: &Connection) -> Result<(), StoreError> {
        let ids = load_ids(db)?;
        self.tx.send_replace(Arc::new(ids));
        Ok(())
    }
}

fn load_ids(db: &Connection) -> Result<HashSet<String>, StoreError> {
    let mut stmt = db.prepare_cached("SELECT preset_id FROM favorites")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DATABASE_FILE;
    use tempfile::TempDir;

    #[test]
    fn test_toggle_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE);

        let store = FavoriteStore::open(&path).unwrap();
        assert!(store.toggle("asset_0").unwrap());
        assert!(store.is_favorite("asset_0"));
        assert!(!store.toggle("asset_0").unwrap());
        assert!(!store.is_favorite("asset_0"));

        store.add("asset_1").unwrap();
        store.add("asset_1").unwrap();
        drop(store);

        let reopened = FavoriteStore::open(&path).unwrap();
        assert_eq!(reopened.ids().len(), 1);
        assert!(reopened.is_favorite("asset_1"));
    }

    #[test]
    fn test_mutations_notify_watchers() {
        let dir = TempDir::new().unwrap();
        let store = FavoriteStore::open(&dir.path().join(DATABASE_FILE)).unwrap();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.add("x").unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().contains("x"));

        store.clear().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }
}
