//! Content-addressable audio cache.
//!
//! One design shared by the utterance-level TTS cache and the word-level
//! cache: a JSON index through the storage port plus one raw PCM file per
//! entry, named deterministically from the cache key so re-writes overwrite
//! instead of leaking files. Entries expire after a TTL; expiry is lazy on
//! `get`, with a `prune_expired` sweep for proactive cleanup.

use crate::audio::concat_base64_chunks;
use crate::error::{CoreError, CoreResult};
use crate::karaoke::WordTimestamp;
use crate::storage::{JsonDocument, KeyValueStore, TTS_CACHE_INDEX_KEY};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCacheEntry {
    pub cache_key: String,
    pub audio_path: String,
    #[serde(default)]
    pub timestamps: Vec<WordTimestamp>,
    pub cached_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AudioCacheIndex {
    pub entries: HashMap<String, AudioCacheEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioCacheStats {
    pub count: usize,
    /// Summed from index metadata, not re-measured from disk.
    pub total_bytes: u64,
    pub total_duration_ms: u64,
}

pub struct AudioCache {
    index: JsonDocument<AudioCacheIndex>,
    dir: PathBuf,
    ttl: Duration,
}

impl AudioCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        index_key: &'static str,
        dir: PathBuf,
        ttl_days: i64,
    ) -> Self {
        Self {
            index: JsonDocument::new(store, index_key),
            dir,
            ttl: Duration::days(ttl_days),
        }
    }

    /// Payload file for a cache key: `<sha256(key)>.pcm` under the cache dir.
    fn audio_path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.pcm", hex::encode(digest)))
    }

    fn is_expired(&self, entry: &AudioCacheEntry) -> bool {
        Utc::now() - entry.cached_at > self.ttl
    }

    /// Look up an entry. An expired entry counts as a miss and is evicted
    /// (index row removed, payload file deleted best-effort).
    pub async fn get(&self, key: &str) -> CoreResult<Option<AudioCacheEntry>> {
        let mut index = self.index.load().await?;
        match index.entries.get(key) {
            None => Ok(None),
            Some(entry) if self.is_expired(entry) => {
                let stale = index.entries.remove(key);
                self.index.save(&index).await?;
                if let Some(stale) = stale {
                    let _ = tokio::fs::remove_file(&stale.audio_path).await;
                }
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
        }
    }

    /// Write audio bytes and persist the index entry. The payload lands in
    /// its own file; the index stores only the path and metadata.
    pub async fn set(
        &self,
        key: &str,
        pcm: &[u8],
        timestamps: Vec<WordTimestamp>,
        duration_ms: u64,
    ) -> CoreResult<AudioCacheEntry> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to create cache dir: {}", e)))?;
        let path = self.audio_path_for(key);
        tokio::fs::write(&path, pcm)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to write audio payload: {}", e)))?;

        let entry = AudioCacheEntry {
            cache_key: key.to_string(),
            audio_path: path.to_string_lossy().to_string(),
            timestamps,
            cached_at: Utc::now(),
            duration_ms,
            size_bytes: pcm.len() as u64,
        };
        let stored = entry.clone();
        self.index
            .update(move |index| {
                index.entries.insert(stored.cache_key.clone(), stored);
            })
            .await?;
        Ok(entry)
    }

    /// Streamed-synthesis variant: chunks arrive base64-encoded and must be
    /// decoded before joining — never concatenated as text.
    pub async fn set_base64_chunks(
        &self,
        key: &str,
        chunks: &[String],
        timestamps: Vec<WordTimestamp>,
        duration_ms: u64,
    ) -> CoreResult<AudioCacheEntry> {
        let pcm = concat_base64_chunks(chunks)?;
        self.set(key, &pcm, timestamps, duration_ms).await
    }

    /// Read an entry's audio back. A missing payload file (index/filesystem
    /// drift) is a recognized failure mode: the index self-heals and the
    /// caller sees `None`, not an error.
    pub async fn read_audio(&self, entry: &AudioCacheEntry) -> CoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(&entry.audio_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "Audio payload missing for key '{}', healing index",
                    entry.cache_key
                );
                let key = entry.cache_key.clone();
                self.index
                    .update(move |index| {
                        index.entries.remove(&key);
                    })
                    .await?;
                Ok(None)
            }
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to read audio payload: {}",
                e
            ))),
        }
    }

    /// Proactive sweep deleting every expired entry. Returns how many were
    /// removed.
    pub async fn prune_expired(&self) -> CoreResult<usize> {
        let mut index = self.index.load().await?;
        let expired: Vec<AudioCacheEntry> = index
            .entries
            .values()
            .filter(|e| self.is_expired(e))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        for entry in &expired {
            index.entries.remove(&entry.cache_key);
        }
        self.index.save(&index).await?;
        for entry in &expired {
            let _ = tokio::fs::remove_file(&entry.audio_path).await;
        }
        Ok(expired.len())
    }

    /// Drop the index key and the whole cache directory.
    pub async fn clear_all(&self) -> CoreResult<()> {
        self.index.clear().await?;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to clear cache dir: {}",
                e
            ))),
        }
    }

    pub async fn stats(&self) -> CoreResult<AudioCacheStats> {
        let index = self.index.load().await?;
        Ok(AudioCacheStats {
            count: index.entries.len(),
            total_bytes: index.entries.values().map(|e| e.size_bytes).sum(),
            total_duration_ms: index.entries.values().map(|e| e.duration_ms).sum(),
        })
    }

    #[cfg(test)]
    pub(crate) async fn backdate_entry(&self, key: &str, cached_at: DateTime<Utc>) {
        self.index
            .update(|index| {
                if let Some(entry) = index.entries.get_mut(key) {
                    entry.cached_at = cached_at;
                }
            })
            .await
            .unwrap();
    }
}

/// Utterance-level TTS cache: content address is the hash of the normalized
/// synthesis input text.
pub struct TtsCache {
    cache: AudioCache,
}

impl TtsCache {
    pub fn new(store: Arc<dyn KeyValueStore>, dir: PathBuf, ttl_days: i64) -> Self {
        Self {
            cache: AudioCache::new(store, TTS_CACHE_INDEX_KEY, dir, ttl_days),
        }
    }

    /// Normalize synthesis input so trivial whitespace/case differences hit
    /// the same entry.
    fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Content address of a synthesis input.
    pub fn text_hash(text: &str) -> String {
        let digest = Sha256::digest(Self::normalize(text).as_bytes());
        hex::encode(digest)
    }

    pub async fn get(&self, text: &str) -> CoreResult<Option<AudioCacheEntry>> {
        self.cache.get(&Self::text_hash(text)).await
    }

    pub async fn set(
        &self,
        text: &str,
        pcm: &[u8],
        timestamps: Vec<WordTimestamp>,
        duration_ms: u64,
    ) -> CoreResult<AudioCacheEntry> {
        self.cache
            .set(&Self::text_hash(text), pcm, timestamps, duration_ms)
            .await
    }

    pub async fn set_base64_chunks(
        &self,
        text: &str,
        chunks: &[String],
        timestamps: Vec<WordTimestamp>,
        duration_ms: u64,
    ) -> CoreResult<AudioCacheEntry> {
        self.cache
            .set_base64_chunks(&Self::text_hash(text), chunks, timestamps, duration_ms)
            .await
    }

    pub async fn read_audio(&self, entry: &AudioCacheEntry) -> CoreResult<Option<Vec<u8>>> {
        self.cache.read_audio(entry).await
    }

    pub async fn prune_expired(&self) -> CoreResult<usize> {
        self.cache.prune_expired().await
    }

    pub async fn clear_all(&self) -> CoreResult<()> {
        self.cache.clear_all().await
    }

    pub async fn stats(&self) -> CoreResult<AudioCacheStats> {
        self.cache.stats().await
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache.dir
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &AudioCache {
        &self.cache
    }
}
