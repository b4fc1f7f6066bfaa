//! Bundled feed shipped with the application

use std::path::PathBuf;

/// Feed compiled into the binary.
pub const EMBEDDED_FEED: &[u8] = include_bytes!("../../assets/presets.json");

/// Where the bundled feed is read from.
#[derive(Debug, Clone)]
pub enum BundledSource {
    /// Bytes baked into the binary
    Embedded(&'static [u8]),

    /// A file on disk (packaging override)
    File(PathBuf),

    /// Raw bytes supplied by the caller
    Bytes(Vec<u8>),
}

impl BundledSource {
    /// Load the raw feed bytes.
    pub fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            BundledSource::Embedded(bytes) => Ok(bytes.to_vec()),
            BundledSource::File(path) => std::fs::read(path),
            BundledSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

impl Default for BundledSource {
    fn default() -> Self {
        BundledSource::Embedded(EMBEDDED_FEED)
    }
}
