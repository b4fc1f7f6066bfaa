//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use preset_catalog::{CancelFlag, Config, FeedFetcher, FetchError};

pub const DEFAULT_URL: &str = "https://feeds.example/default.json";

/// Alpha and Beta get generated ids, the third one carries its own.
pub const BUNDLE: &str = r#"{
    "version": 2,
    "presets": [
        { "name": "Alpha", "filter": "Standard", "tone": 0 },
        { "name": "Beta", "filter": "Vivid 60%" },
        { "id": "p1", "name": "Shared", "saturation": 1 }
    ]
}"#;

pub const BUNDLE_IDS: [&str; 3] = ["asset_alpha_0", "asset_beta_1", "p1"];

/// Feed document with one preset per name, each carrying an explicit id.
pub fn feed(version: u32, presets: &[(&str, &str)]) -> String {
    let entries: Vec<serde_json::Value> = presets
        .iter()
        .map(|(id, name)| serde_json::json!({ "id": id, "name": name, "tone": 1 }))
        .collect();
    serde_json::json!({ "version": version, "presets": entries }).to_string()
}

/// Config rooted in a temp dir, with a file bundle so ids are predictable.
pub fn config(dir: &Path, default_url: Option<&str>) -> Config {
    let bundle = dir.join("bundle.json");
    std::fs::write(&bundle, BUNDLE).unwrap();

    let mut config = Config::default();
    config.catalog.data_dir = dir.join("data");
    config.catalog.bundled_feed = Some(bundle);
    config.catalog.default_subscription_url = default_url.map(str::to_string);
    config.sync.fetch_timeout_ms = 1_000;
    config
}

/// In-memory [`FeedFetcher`] answering from a script. Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
    calls: Mutex<Vec<String>>,
    cancel_on_fetch: Mutex<Option<CancelFlag>>,
    ignore_limit: AtomicBool,
}

impl ScriptedFetcher {
    pub fn respond(&self, url: &str, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.as_bytes().to_vec()));
    }

    pub fn fail(&self, url: &str, error: FetchError) {
        self.responses.lock().unwrap().insert(url.to_string(), Err(error));
    }

    /// Cancel `flag` as soon as any fetch starts.
    pub fn cancel_on_fetch(&self, flag: CancelFlag) {
        *self.cancel_on_fetch.lock().unwrap() = Some(flag);
    }

    /// Hand back bodies of any size, like a fetcher that skips the byte limit.
    pub fn ignore_limit(&self) {
        self.ignore_limit.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch_bytes(
        &self,
        url: &str,
        _timeout: Duration,
        max_bytes: usize,
    ) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(flag) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            flag.cancel();
        }
        let body = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))?;
        if body.len() > max_bytes && !self.ignore_limit.load(Ordering::SeqCst) {
            return Err(FetchError::TooLarge {
                size: body.len() as u64,
                limit: max_bytes,
            });
        }
        Ok(body)
    }
}
