//! Story offline cache.
//!
//! Full story JSON plus per-spread illustrations, cached per story under its
//! own directory. The JSON index tracks aggregate size and last-read time so
//! an eviction policy can be layered on top; this cache records the
//! timestamps faithfully and leaves the eviction decision to its callers.

use crate::database::DownloadQueue;
use crate::error::{CoreError, CoreResult};
use crate::events::InvalidationBus;
use crate::storage::{JsonDocument, KeyValueStore, STORY_CACHE_INDEX_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

/// One double-page unit of a story: illustration plus text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spread {
    pub spread_number: i64,
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub status: StoryStatus,
    pub is_illustrated: bool,
    pub spreads: Vec<Spread>,
}

/// Index record for one cached story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheIndexEntry {
    pub cached_at: DateTime<Utc>,
    pub last_read: DateTime<Utc>,
    pub size_bytes: u64,
    pub spread_count: i64,
    pub title: String,
}

pub struct StoryCache {
    index: JsonDocument<HashMap<String, CacheIndexEntry>>,
    root: PathBuf,
    bus: Arc<InvalidationBus>,
}

impl StoryCache {
    pub fn new(store: Arc<dyn KeyValueStore>, root: PathBuf, bus: Arc<InvalidationBus>) -> Self {
        Self {
            index: JsonDocument::new(store, STORY_CACHE_INDEX_KEY),
            root,
            bus,
        }
    }

    /// Automatic caching only applies to finished, illustrated stories;
    /// anything else is served from the network on every read.
    pub fn should_auto_cache(story: &Story) -> bool {
        story.status == StoryStatus::Completed && story.is_illustrated
    }

    fn story_dir(&self, story_id: &str) -> PathBuf {
        let safe: String = story_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    fn story_json_path(&self, story_id: &str) -> PathBuf {
        self.story_dir(story_id).join("story.json")
    }

    /// Where a spread's illustration lands once downloaded.
    pub fn spread_destination(&self, story_id: &str, spread_number: i64) -> PathBuf {
        self.story_dir(story_id)
            .join(format!("spread_{}.png", spread_number))
    }

    pub async fn is_story_cached(&self, story_id: &str) -> CoreResult<bool> {
        Ok(self.index.load().await?.contains_key(story_id))
    }

    /// Load a cached story, rewriting spread image URLs to local `file://`
    /// paths for every illustration actually on disk, and bumping the
    /// story's last-read timestamp.
    pub async fn load_cached_story(&self, story_id: &str) -> CoreResult<Option<Story>> {
        if !self.is_story_cached(story_id).await? {
            return Ok(None);
        }
        let raw = match tokio::fs::read(self.story_json_path(story_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index/filesystem drift: heal the index and report a miss.
                log::warn!("Cached story '{}' missing on disk, healing index", story_id);
                self.index
                    .update(|map| {
                        map.remove(story_id);
                    })
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                return Err(CoreError::Storage(format!(
                    "Failed to read cached story '{}': {}",
                    story_id, e
                )))
            }
        };
        let mut story: Story = serde_json::from_slice(&raw)?;

        for spread in &mut story.spreads {
            let local = self.spread_destination(story_id, spread.spread_number);
            if tokio::fs::try_exists(&local).await.unwrap_or(false) {
                spread.image_url = Some(format!("file://{}", local.display()));
            }
        }

        self.update_last_read(story_id).await?;
        Ok(Some(story))
    }

    /// Bump only `last_read`. Silently a no-op when the story is not in the
    /// index; sibling fields are never touched.
    pub async fn update_last_read(&self, story_id: &str) -> CoreResult<()> {
        self.index
            .update(|map| {
                if let Some(entry) = map.get_mut(story_id) {
                    entry.last_read = Utc::now();
                }
            })
            .await
    }

    /// Write the story JSON, record the index entry and queue every
    /// illustrated spread for download. Returns false (and does nothing)
    /// for stories not eligible for automatic caching.
    pub async fn cache_story(&self, story: &Story, queue: &DownloadQueue) -> CoreResult<bool> {
        if !Self::should_auto_cache(story) {
            log::debug!(
                "Story '{}' not eligible for offline caching (status/illustration)",
                story.id
            );
            return Ok(false);
        }

        let dir = self.story_dir(&story.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to create story dir: {}", e)))?;
        let json = serde_json::to_vec(story)?;
        let json_len = json.len() as u64;
        tokio::fs::write(self.story_json_path(&story.id), json)
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to write story JSON: {}", e)))?;

        let now = Utc::now();
        let entry = CacheIndexEntry {
            cached_at: now,
            last_read: now,
            size_bytes: json_len,
            spread_count: story.spreads.len() as i64,
            title: story.title.clone(),
        };
        self.index
            .update(|map| {
                map.insert(story.id.clone(), entry);
            })
            .await?;

        let illustrated: Vec<&Spread> = story
            .spreads
            .iter()
            .filter(|s| s.image_url.is_some())
            .collect();
        queue.queue_story(&story.id, illustrated.len() as i64)?;
        for spread in illustrated {
            let dest = self.spread_destination(&story.id, spread.spread_number);
            queue.queue_spread(
                &story.id,
                spread.spread_number,
                spread.image_url.as_deref().unwrap_or_default(),
                &dest.to_string_lossy(),
            )?;
        }

        log::info!(
            "Story '{}' cached ({} spreads queued for download)",
            story.id,
            story.spreads.len()
        );
        Ok(true)
    }

    /// Add downloaded illustration bytes to the story's aggregate size.
    pub async fn add_story_bytes(&self, story_id: &str, bytes: u64) -> CoreResult<()> {
        self.index
            .update(|map| {
                if let Some(entry) = map.get_mut(story_id) {
                    entry.size_bytes += bytes;
                }
            })
            .await
    }

    /// Remove the cached copy (files and index entry together) and notify
    /// every invalidation subscriber for this story id.
    pub async fn invalidate_story(&self, story_id: &str) -> CoreResult<()> {
        match tokio::fs::remove_dir_all(self.story_dir(story_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CoreError::Storage(format!(
                    "Failed to remove cached story '{}': {}",
                    story_id, e
                )))
            }
        }
        self.index
            .update(|map| {
                map.remove(story_id);
            })
            .await?;
        self.bus.emit(story_id);
        Ok(())
    }

    /// Aggregate size of everything cached, summed from index metadata.
    pub async fn cache_size(&self) -> CoreResult<u64> {
        Ok(self.index.load().await?.values().map(|e| e.size_bytes).sum())
    }

    pub async fn cached_story_ids(&self) -> CoreResult<Vec<String>> {
        Ok(self.index.load().await?.keys().cloned().collect())
    }

    pub async fn entry(&self, story_id: &str) -> CoreResult<Option<CacheIndexEntry>> {
        Ok(self.index.load().await?.get(story_id).cloned())
    }

    pub async fn clear_all(&self) -> CoreResult<()> {
        self.index.clear().await?;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Storage(format!(
                "Failed to clear story cache: {}",
                e
            ))),
        }
    }
}
