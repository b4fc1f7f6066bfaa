//! Preset feed wire format
//!
//! A feed is a JSON document:
//!
//! ```json
//! { "version": 2, "presets": [ { "id": "optional", "name": "Blue Hour", "filter": "Cool 60%" } ] }
//! ```
//!
//! Parsing is pure: no I/O, no knowledge of the final merge context. Records
//! without an id get one from [`generate_id`]; records that carry an id keep it
//! (namespacing happens in the aggregator).

pub mod bundled;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::preset::{generate_id, Parameters, PresetRecord, SourceTag};

pub use bundled::BundledSource;

/// Schema version written by current feeds.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Schema version of the deprecated single remote feed design.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Keys that are computed at read time and must never enter the parameter bag.
const NON_INTRINSIC_KEYS: &[&str] = &["isFavorite", "isCustom"];

/// Feed decoding errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed feed: {0}")]
    Malformed(String),

    #[error("Feed top level is not an object")]
    NotAnObject,

    #[error("Invalid version field: {0}")]
    InvalidVersion(String),
}

/// Result of parsing one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    /// Schema version carried by the document
    pub version: u32,

    /// Records in document order, every one with an id
    pub records: Vec<PresetRecord>,

    /// Entries dropped because they were not objects or had no name
    pub skipped: usize,
}

/// Top-level document as it travels on the wire.
#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    version: Option<Value>,

    #[serde(default)]
    presets: Option<Vec<Value>>,
}

/// Outgoing document, used for export.
#[derive(Debug, Serialize)]
struct FeedDocument<'a> {
    version: u32,
    presets: &'a [PresetRecord],
}

/// Parse a feed, assigning ids to records that arrive without one.
pub fn parse(bytes: &[u8], source: &SourceTag) -> Result<ParsedFeed, ParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }

    let raw: RawFeed =
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let version = match raw.version {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ParseError::InvalidVersion(n.to_string()))?,
        Some(other) => return Err(ParseError::InvalidVersion(other.to_string())),
    };

    let entries = raw.presets.unwrap_or_default();
    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for (index, entry) in entries.into_iter().enumerate() {
        match decode_record(entry, source, index) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                warn!(source = %source, index, "Skipping preset entry without a name");
            }
        }
    }

    debug!(
        source = %source,
        version,
        count = records.len(),
        skipped,
        "Parsed feed"
    );

    Ok(ParsedFeed {
        version,
        records,
        skipped,
    })
}

fn decode_record(entry: Value, source: &SourceTag, index: usize) -> Option<PresetRecord> {
    let Value::Object(mut fields) = entry else {
        return None;
    };

    let name = match fields.remove("name") {
        Some(Value::String(name)) => name,
        _ => return None,
    };

    let id = match fields.remove("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        _ => generate_id(&name, source.id_tag(), index),
    };

    for key in NON_INTRINSIC_KEYS {
        fields.remove(*key);
    }

    let parameters: Parameters = fields;
    Some(PresetRecord {
        id: Some(id),
        name,
        parameters,
        source: source.clone(),
        is_favorite: false,
    })
}

/// Serialize records back into the feed wire format.
pub fn presets_to_document(version: u32, records: &[PresetRecord]) -> Result<Vec<u8>, ParseError> {
    let doc = FeedDocument {
        version,
        presets: records,
    };
    serde_json::to_vec_pretty(&doc).map_err(|e| ParseError::Malformed(e.to_string()))
}
