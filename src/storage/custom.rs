//! User-authored presets
//!
//! Kept most-recent-first. Ids always carry the reserved `custom_` prefix.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{lock, open_database, StoreError};
use crate::preset::{custom_id, PresetRecord, SourceTag};

/// Persistent list of user-authored presets.
pub struct CustomPresetStore {
    db: Mutex<Connection>,
    tx: watch::Sender<Arc<Vec<PresetRecord>>>,
}

impl CustomPresetStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let db = open_database(db_path)?;
        let initial = load_all(&db)?;
        debug!(count = initial.len(), "Custom presets loaded");
        let (tx, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            db: Mutex::new(db),
            tx,
        })
    }

    /// Current list, most recent first.
    pub fn list(&self) -> Arc<Vec<PresetRecord>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<PresetRecord>>> {
        self.tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<PresetRecord> {
        self.tx.borrow().iter().find(|p| p.id() == id).cloned()
    }

    /// Add a preset at the front of the list, returning the stored record.
    pub fn add(&self, preset: PresetRecord) -> Result<PresetRecord, StoreError> {
        let mut record = preset;
        record.id = Some(custom_id(record.id.as_deref()));
        record.source = SourceTag::UserAuthored;
        record.is_favorite = false;

        let body = serde_json::to_string(&record)?;
        let db = lock(&self.db);
        db.execute(
            "INSERT INTO custom_presets (id, seq, body)
             VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM custom_presets), ?2)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            rusqlite::params![record.id(), body],
        )?;
        self.publish(&db)?;

        info!(id = record.id(), name = %record.name, "Custom preset added");
        Ok(record)
    }

    /// Replace an existing preset in place. Unknown ids are ignored.
    pub fn update(&self, preset: PresetRecord) -> Result<bool, StoreError> {
        let mut record = preset;
        record.source = SourceTag::UserAuthored;
        record.is_favorite = false;

        let body = serde_json::to_string(&record)?;
        let db = lock(&self.db);
        let changed = db.execute(
            "UPDATE custom_presets SET body = ?2 WHERE id = ?1",
            rusqlite::params![record.id(), body],
        )?;
        if changed > 0 {
            self.publish(&db)?;
        }
        Ok(changed > 0)
    }

    /// Delete a preset. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let db = lock(&self.db);
        let removed = db.execute("DELETE FROM custom_presets WHERE id = ?1", [id])?;
        if removed > 0 {
            self.publish(&db)?;
            info!(id, "Custom preset deleted");
        }
        Ok(removed > 0)
    }

    fn publish(&self, db: &Connection) -> Result<(), StoreError> {
        let presets = load_all(db)?;
        self.tx.send_replace(Arc::new(presets));
        Ok(())
    }
}

fn load_all(db: &Connection) -> Result<Vec<PresetRecord>, StoreError> {
    let mut stmt = db.prepare_cached("SELECT body FROM custom_presets ORDER BY seq DESC")?;
    let bodies = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut presets = Vec::with_capacity(bodies.len());
    for body in bodies {
        let mut record: PresetRecord = serde_json::from_str(&body)?;
        record.source = SourceTag::UserAuthored;
        presets.push(record);
    }
    Ok(presets)
}
