//! Preset id derivation
//!
//! Generated ids must stay stable across releases because favorites and
//! user-authored references key off them.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Id tag of the shipped bundle (and of the default subscription replacing it).
pub const BUNDLED_TAG: &str = "asset";

/// Reserved prefix for user-authored ids.
pub const CUSTOM_PREFIX: &str = "custom_";

/// Prefix of ids namespaced under a subscription URL.
pub const SUBSCRIPTION_PREFIX: &str = "sub_";

const MAX_BASE_LEN: usize = 30;

/// Derive an id from a display name, the source tag and the record position.
///
/// The seed is `{source_tag}_{name}` (or just `name` for an empty tag). It is
/// NFD-decomposed, stripped of combining diacritical marks, lowercased, and every
/// run of characters outside `[a-z0-9]` becomes one `_`. The base is cut to 30
/// characters, replaced by `preset_{index}` when shorter than two, and always
/// suffixed with `_{index}`.
///
/// Every source passes a tag of at least two ASCII characters (`asset` for the
/// bundle), so the `preset_{index}` form only shows up for an empty tag.
pub fn generate_id(name: &str, source_tag: &str, index: usize) -> String {
    let seed = if source_tag.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", source_tag, name)
    };

    let stripped: String = seed
        .nfd()
        .filter(|c| !is_combining_diacritical(*c))
        .collect();
    let lower = stripped.to_lowercase();

    let mut cleaned = String::with_capacity(lower.len());
    let mut separator = false;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if separator && !cleaned.is_empty() {
                cleaned.push('_');
            }
            separator = false;
            cleaned.push(c);
        } else {
            separator = true;
        }
    }

    // cleaned is pure ASCII here, byte slicing is safe
    let base = if cleaned.len() < 2 {
        format!("preset_{}", index)
    } else {
        cleaned[..cleaned.len().min(MAX_BASE_LEN)].to_string()
    };

    format!("{}_{}", base, index)
}

/// U+0300..U+036F, the Combining Diacritical Marks block.
fn is_combining_diacritical(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Short, stable hash of a source URL.
pub fn source_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..8].to_string()
}

/// Namespace a record id under its subscription URL.
pub fn namespace_id(url: &str, id: &str) -> String {
    format!("{}{}_{}", SUBSCRIPTION_PREFIX, source_hash(url), id)
}

/// Id for a user-authored preset. Always carries [`CUSTOM_PREFIX`], so it can
/// never collide with bundled or namespaced subscription ids.
pub fn custom_id(existing: Option<&str>) -> String {
    match existing.map(str::trim) {
        Some(id) if id.starts_with(CUSTOM_PREFIX) => id.to_string(),
        Some(id) if !id.is_empty() => format!("{}{}", CUSTOM_PREFIX, id),
        _ => format!("{}{}", CUSTOM_PREFIX, uuid::Uuid::new_v4()),
    }
}
