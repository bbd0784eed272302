//! Offline media cache and synchronization core for the Storytime
//! storybook app.
//!
//! Everything the reader screens need to work without a network: the story
//! offline cache with its durable download queue, the utterance and
//! word-level TTS audio caches, the karaoke word-timing engine, and the
//! word-tap synthesis orchestrator. The UI layer, navigation and the
//! synthesis/connectivity platform glue live outside this crate and plug in
//! through the port traits ([`storage::KeyValueStore`],
//! [`network::ConnectivityProvider`], [`speech::SpeechSynthesizer`],
//! [`speech::AudioSink`], [`worker::download::SpreadFetcher`]).

pub mod api;
pub mod audio;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod karaoke;
pub mod network;
pub mod pronounce;
pub mod speech;
pub mod storage;
pub mod wordtts;
pub mod worker;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};

use cache::{StoryCache, TtsCache, WordTtsCache};
use database::DownloadQueue;
use events::InvalidationBus;
use network::{ConnectivityProvider, SyncPolicy};
use std::sync::Arc;
use storage::{FileStore, KeyValueStore};

/// Every store and cache of the offline core, constructed once at process
/// start and passed by reference to consumers. No module-level singletons;
/// `reset` exists for test isolation.
pub struct CoreContext {
    pub config: CoreConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<InvalidationBus>,
    pub story_cache: Arc<StoryCache>,
    pub tts_cache: Arc<TtsCache>,
    pub word_cache: Arc<WordTtsCache>,
    pub queue: Arc<DownloadQueue>,
    pub policy: Arc<SyncPolicy>,
}

impl CoreContext {
    pub fn init(
        config: CoreConfig,
        connectivity: Arc<dyn ConnectivityProvider>,
    ) -> CoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::new(config.data_dir.join("indices")));
        let bus = Arc::new(InvalidationBus::new());
        let story_cache = Arc::new(StoryCache::new(
            store.clone(),
            config.story_cache_dir(),
            bus.clone(),
        ));
        let tts_cache = Arc::new(TtsCache::new(
            store.clone(),
            config.tts_cache_dir(),
            config.audio_cache.ttl_days,
        ));
        let word_cache = Arc::new(WordTtsCache::new(
            store.clone(),
            config.word_cache_dir(),
            config.audio_cache.ttl_days,
        ));
        let queue = Arc::new(DownloadQueue::new(&config.queue_db_path())?);
        let policy = Arc::new(SyncPolicy::new(connectivity, store.clone()));

        log::info!("Offline core initialized at {:?}", config.data_dir);

        Ok(Self {
            config,
            store,
            bus,
            story_cache,
            tts_cache,
            word_cache,
            queue,
            policy,
        })
    }

    /// Wipe every cache and the queue. Test-isolation lifecycle; the app
    /// itself only calls this from the "clear offline data" setting.
    pub async fn reset(&self) -> CoreResult<()> {
        self.story_cache.clear_all().await?;
        self.tts_cache.clear_all().await?;
        self.word_cache.clear_all().await?;
        self.queue.clear_all()?;
        Ok(())
    }
}

/// Install the fmt subscriber with env-filter; `log` macro records are
/// bridged through it. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::story::{Spread, Story, StoryStatus};
    use crate::network::SharedConnectivity;

    fn story() -> Story {
        Story {
            id: "s1".to_string(),
            title: "The Paper Dragon".to_string(),
            status: StoryStatus::Completed,
            is_illustrated: true,
            spreads: vec![Spread {
                spread_number: 1,
                text: "Once upon a time".to_string(),
                image_url: Some("https://cdn.example.com/1.png".to_string()),
            }],
        }
    }

    #[tokio::test]
    async fn init_and_reset_lifecycle() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = CoreConfig {
            data_dir: temp.path().join("storytime"),
            ..CoreConfig::default()
        };
        let ctx = CoreContext::init(config, Arc::new(SharedConnectivity::offline())).unwrap();

        ctx.story_cache.cache_story(&story(), &ctx.queue).await.unwrap();
        ctx.tts_cache
            .set("hello world", &[1, 2, 3], vec![], 100)
            .await
            .unwrap();
        assert!(ctx.story_cache.is_story_cached("s1").await.unwrap());
        assert_eq!(ctx.tts_cache.stats().await.unwrap().count, 1);
        assert_eq!(ctx.queue.queue_stats().unwrap().total, 1);

        ctx.reset().await.unwrap();
        assert!(!ctx.story_cache.is_story_cached("s1").await.unwrap());
        assert_eq!(ctx.tts_cache.stats().await.unwrap().count, 0);
        assert_eq!(ctx.queue.queue_stats().unwrap().total, 0);
    }
}
