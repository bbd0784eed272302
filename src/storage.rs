//! Key-value storage port.
//!
//! Cache indices and sync settings are small JSON documents persisted under
//! named keys. The core never talks to a concrete storage technology
//! directly: everything goes through [`KeyValueStore`], with one file-backed
//! production adapter and one in-memory adapter for tests.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Storage key for the story cache index.
pub const STORY_CACHE_INDEX_KEY: &str = "story_cache_index";
/// Storage key for the utterance-level TTS cache index.
pub const TTS_CACHE_INDEX_KEY: &str = "tts_cache_index";
/// Storage key for the word-level TTS cache index.
pub const WORD_CACHE_INDEX_KEY: &str = "word_tts_cache_index";
/// Storage key for persisted sync settings.
pub const SYNC_SETTINGS_KEY: &str = "sync_settings";

/// Port for small string-blob persistence under named keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> CoreResult<()>;
    async fn remove(&self, key: &str) -> CoreResult<()>;
}

/// File-backed adapter: one JSON file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed identifiers, but stay safe against path characters.
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to read key '{}': {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to create store dir: {}", e)))?;
        tokio::fs::write(self.path_for(key), value)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to write key '{}': {}", key, e)))
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to remove key '{}': {}",
                key, e
            ))),
        }
    }
}

/// In-memory adapter for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// One logical JSON document persisted under a fixed storage key.
///
/// All mutations are read-modify-write over the whole serialized blob. There
/// is no compare-and-swap: two interleaved update cycles on the same key can
/// clobber each other's write. Writers are serialized by caller discipline
/// (single app process, UI-driven) — a known limitation of this design, not
/// an invariant the store enforces.
pub struct JsonDocument<D> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    _marker: PhantomData<D>,
}

impl<D> JsonDocument<D>
where
    D: Default + Serialize + DeserializeOwned + Send,
{
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            _marker: PhantomData,
        }
    }

    /// Load the document; an absent key yields `D::default()`.
    pub async fn load(&self) -> CoreResult<D> {
        match self.store.get(self.key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                CoreError::Storage(format!("Corrupt index under '{}': {}", self.key, e))
            }),
            None => Ok(D::default()),
        }
    }

    pub async fn save(&self, doc: &D) -> CoreResult<()> {
        let raw = serde_json::to_string(doc)?;
        self.store.set(self.key, &raw).await
    }

    /// Read-modify-write in one call site. Returns whatever the closure does.
    pub async fn update<R>(&self, f: impl FnOnce(&mut D) -> R + Send) -> CoreResult<R> {
        let mut doc = self.load().await?;
        let out = f(&mut doc);
        self.save(&doc).await?;
        Ok(out)
    }

    /// Delete the whole document.
    pub async fn clear(&self) -> CoreResult<()> {
        self.store.remove(self.key).await
    }
}
