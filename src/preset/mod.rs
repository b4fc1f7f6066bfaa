//! Preset records and provenance
//!
//! A preset is a named bag of color-grading parameters. The catalog core never
//! interprets the parameters; it only assigns ids, tracks where each record came
//! from and overlays the favorite flag at read time.

pub mod id;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use id::{custom_id, generate_id, namespace_id, source_hash, BUNDLED_TAG, CUSTOM_PREFIX};

/// Opaque parameter bag (filter, tone, saturation, ...), passed through untouched.
pub type Parameters = Map<String, Value>;

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SourceTag {
    /// Shipped bundle, or the cached feed of the default subscription replacing it
    #[default]
    Bundled,

    /// A user-added remote feed
    Subscription(String),

    /// Created on the device
    UserAuthored,
}

impl SourceTag {
    /// Tag mixed into generated ids for records that arrive without one.
    pub fn id_tag(&self) -> &str {
        match self {
            SourceTag::Bundled => BUNDLED_TAG,
            SourceTag::Subscription(url) => url,
            SourceTag::UserAuthored => "custom",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTag::Bundled => write!(f, "bundled"),
            SourceTag::Subscription(url) => write!(f, "subscription:{}", url),
            SourceTag::UserAuthored => write!(f, "custom"),
        }
    }
}

/// A single color-grading preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetRecord {
    /// Unique within a published catalog once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name, any script
    pub name: String,

    /// Everything else the feed carried
    #[serde(flatten)]
    pub parameters: Parameters,

    /// Provenance, never written to the wire format
    #[serde(skip)]
    pub source: SourceTag,

    /// Overlaid from the favorite store when a snapshot is built
    #[serde(skip)]
    pub is_favorite: bool,
}

impl PresetRecord {
    pub fn new(name: impl Into<String>, source: SourceTag) -> Self {
        Self {
            id: None,
            name: name.into(),
            parameters: Parameters::new(),
            source,
            is_favorite: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Assigned id, empty string when not assigned yet.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// True only for user-authored records.
    pub fn is_custom(&self) -> bool {
        matches!(self.source, SourceTag::UserAuthored)
    }
}
