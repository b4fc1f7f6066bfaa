//! Pure merge steps applied to already-parsed sources

use std::collections::HashSet;

use tracing::warn;

use crate::preset::{namespace_id, PresetRecord};

/// Prefix every record id with the short hash of the subscription URL.
pub fn namespace_records<'a>(
    url: &'a str,
    records: &'a [PresetRecord],
) -> impl Iterator<Item = PresetRecord> + 'a {
    records.iter().map(move |record| {
        let mut record = record.clone();
        record.id = Some(namespace_id(url, record.id()));
        record
    })
}

/// Keep the first record for every id, returning how many were dropped.
pub fn dedup_by_id(records: Vec<PresetRecord>) -> (Vec<PresetRecord>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        if seen.insert(record.id().to_string()) {
            kept.push(record);
        } else {
            dropped += 1;
            warn!(id = record.id(), source = %record.source, "Dropping preset with duplicate id");
        }
    }

    (kept, dropped)
}

/// Set `is_favorite` from the favorite id set.
pub fn overlay_favorites(records: &mut [PresetRecord], favorites: &HashSet<String>) {
    for record in records {
        record.is_favorite = favorites.contains(record.id());
    }
}
