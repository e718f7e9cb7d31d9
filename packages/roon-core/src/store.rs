//! Persistent settings document.
//!
//! One JSON object on disk (`Configuration.json`) mapping bucket names to
//! arbitrary JSON values. The document is read on first access and cached;
//! every save rewrites the whole file.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol_constants::CONFIG_FILE_NAME;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode settings: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    /// `None` until first access.
    document: Mutex<Option<Map<String, Value>>>,
}

impl ConfigStore {
    /// Creates a store backed by `Configuration.json` inside `dir`.
    ///
    /// Nothing is read until the first `load` or `save`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CONFIG_FILE_NAME);
        Self {
            dir,
            path,
            document: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, treating any failure as an empty store.
    fn read_document(path: &Path) -> Map<String, Value> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[Store] No settings at {}, starting empty", path.display());
                return Map::new();
            }
            Err(e) => {
                log::warn!("[Store] Failed to read {}: {}", path.display(), e);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                log::warn!("[Store] {} is not a JSON object, ignoring", path.display());
                Map::new()
            }
            Err(e) => {
                log::warn!("[Store] Failed to parse {}: {}", path.display(), e);
                Map::new()
            }
        }
    }

    /// Loads bucket `key`.
    ///
    /// Returns `None` when the bucket is absent or does not deserialize into
    /// `T`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut guard = self.document.lock();
        let document = guard.get_or_insert_with(|| Self::read_document(&self.path));
        let value = document.get(key)?.clone();
        drop(guard);

        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("[Store] Bucket '{}' has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Replaces bucket `key` and rewrites the document.
    ///
    /// Uses atomic write (temp file + rename). Creates the directory if it
    /// doesn't exist.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;

        let mut guard = self.document.lock();
        let document = guard.get_or_insert_with(|| Self::read_document(&self.path));
        document.insert(key.to_string(), value);

        let contents = serde_json::to_string_pretty(&*document)?;
        std::fs::create_dir_all(&self.dir)?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, &self.path)?;

        log::debug!("[Store] Saved bucket '{}' to {}", key, self.path.display());
        Ok(())
    }
}
