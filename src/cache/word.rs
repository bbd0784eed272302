//! Word-level TTS cache.
//!
//! The cache key folds in every prosodic input that changes the correct
//! audio: the same surface word at the start of a question and in the middle
//! of a statement is a different entry. Homographs additionally carry the
//! resolved pronunciation index.

use crate::cache::audio::{AudioCache, AudioCacheEntry, AudioCacheStats};
use crate::error::CoreResult;
use crate::storage::{KeyValueStore, WORD_CACHE_INDEX_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the word sits in its sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordPosition {
    Start,
    Mid,
    End,
}

impl fmt::Display for WordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Mid => write!(f, "mid"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Sentence mood, which drives prosody (and the emotion tag at synthesis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentenceType {
    Statement,
    Question,
    Exclamation,
}

impl fmt::Display for SentenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statement => write!(f, "statement"),
            Self::Question => write!(f, "question"),
            Self::Exclamation => write!(f, "exclamation"),
        }
    }
}

/// Composite cache key for one word in one prosodic context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WordCacheKey {
    pub word: String,
    pub position: WordPosition,
    pub punctuation: Option<String>,
    pub sentence_type: SentenceType,
    pub pronunciation_index: Option<u32>,
}

impl WordCacheKey {
    pub fn new(
        word: &str,
        position: WordPosition,
        punctuation: Option<&str>,
        sentence_type: SentenceType,
        pronunciation_index: Option<u32>,
    ) -> Self {
        Self {
            word: normalize_word(word),
            position,
            punctuation: punctuation.map(|p| p.to_string()),
            sentence_type,
            pronunciation_index,
        }
    }

    /// Deterministic string form: identical context produces an identical
    /// key, and any differing component produces a different one.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.word,
            self.position,
            self.punctuation.as_deref().unwrap_or("none"),
            self.sentence_type,
            self.pronunciation_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "default".to_string()),
        )
    }
}

/// Lowercase and strip everything that is not part of the word itself;
/// punctuation is tracked separately in the key.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric() || *c == '\'' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

/// Word-level audio cache: the shared content-addressable design keyed by
/// [`WordCacheKey`]. Word entries carry no timestamp sequence (one word has
/// nothing to highlight).
pub struct WordTtsCache {
    cache: AudioCache,
}

impl WordTtsCache {
    pub fn new(store: Arc<dyn KeyValueStore>, dir: PathBuf, ttl_days: i64) -> Self {
        Self {
            cache: AudioCache::new(store, WORD_CACHE_INDEX_KEY, dir, ttl_days),
        }
    }

    pub async fn get(&self, key: &WordCacheKey) -> CoreResult<Option<AudioCacheEntry>> {
        self.cache.get(&key.cache_key()).await
    }

    pub async fn set(
        &self,
        key: &WordCacheKey,
        pcm: &[u8],
        duration_ms: u64,
    ) -> CoreResult<AudioCacheEntry> {
        self.cache.set(&key.cache_key(), pcm, Vec::new(), duration_ms).await
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
}
