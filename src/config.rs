//! Core configuration.
//!
//! Every field has a default so the core runs with no config file at all;
//! a YAML file (the app ships one next to its data directory) can override
//! any subset of fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Audio format produced by the synthesis backend and stored in the caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormatConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl Default for AudioFormatConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            bits_per_sample: 16,
            channels: 1,
        }
    }
}

/// Audio cache tuning shared by the utterance and word caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCacheConfig {
    /// Entries older than this are treated as misses and evicted lazily.
    pub ttl_days: i64,
}

impl Default for AudioCacheConfig {
    fn default() -> Self {
        Self { ttl_days: 7 }
    }
}

/// Karaoke timing engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KaraokeConfig {
    /// Evaluator tick interval in milliseconds.
    pub tick_ms: u64,
    /// Epoch offset compensating for audio hardware/buffer delay. The
    /// highlight lags the nominal timestamps by this much so it matches
    /// what the listener actually hears.
    pub audio_latency_ms: u64,
    /// How long after the final word's end tracking auto-stops.
    pub trailing_stop_ms: u64,
}

impl Default for KaraokeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            audio_latency_ms: 150,
            trailing_stop_ms: 500,
        }
    }
}

/// Background sync worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum retry attempts per story before it stays failed.
    pub max_retries: i32,
    /// Idle poll interval for the worker loop, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval_secs: 300,
        }
    }
}

/// Top-level configuration for the offline core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root directory for all persisted state (indices, caches, queue DB).
    pub data_dir: PathBuf,
    /// Base URL of the story service.
    pub api_base_url: String,
    /// Base URL of the pronunciation (homograph disambiguation) service.
    pub pronounce_base_url: String,
    pub audio: AudioFormatConfig,
    pub audio_cache: AudioCacheConfig,
    pub karaoke: KaraokeConfig,
    pub sync: SyncConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storytime");
        Self {
            data_dir,
            api_base_url: "https://api.storytime.app".to_string(),
            pronounce_base_url: "https://api.storytime.app/pronounce".to_string(),
            audio: AudioFormatConfig::default(),
            audio_cache: AudioCacheConfig::default(),
            karaoke: KaraokeConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from a YAML file, falling back to defaults for
    /// anything the file does not mention. A missing file is not an error.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Invalid config at {:?}, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Directory for cached story JSON and illustrations.
    pub fn story_cache_dir(&self) -> PathBuf {
        self.data_dir.join("stories")
    }

    /// Directory for utterance-level TTS audio payloads.
    pub fn tts_cache_dir(&self) -> PathBuf {
        self.data_dir.join("tts")
    }

    /// Directory for word-level TTS audio payloads.
    pub fn word_cache_dir(&self) -> PathBuf {
        self.data_dir.join("tts_words")
    }

    /// Path of the download queue database.
    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join("download_queue.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let config = CoreConfig::default();
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.audio_cache.ttl_days, 7);
        assert_eq!(config.karaoke.tick_ms, 50);
        assert_eq!(config.karaoke.audio_latency_ms, 150);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "api_base_url: \"http://localhost:9999\"").unwrap();
        writeln!(f, "karaoke:").unwrap();
        writeln!(f, "  audio_latency_ms: 200").unwrap();

        let config = CoreConfig::load(&path);
        assert_eq!(config.api_base_url, "http://localhost:9999");
        assert_eq!(config.karaoke.audio_latency_ms, 200);
        // Untouched sections keep their defaults
        assert_eq!(config.karaoke.tick_ms, 50);
        assert_eq!(config.audio.sample_rate, 24_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = CoreConfig::load(Path::new("/nonexistent/config.yaml"));
        assert_eq!(config.audio_cache.ttl_days, 7);
    }
}
