//! Background sync worker.
//!
//! Drains the durable download queue: claims incomplete stories in FIFO
//! order, downloads each pending spread, and records progress so a restart
//! resumes exactly where the last run stopped. Every pass is gated by the
//! network-awareness policy.

pub mod download;

use crate::cache::story::StoryCache;
use crate::config::SyncConfig;
use crate::database::{DownloadQueue, DownloadStatus, StoryStatusUpdate};
use crate::network::SyncPolicy;
use download::{download_with_retry, SpreadFetcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What one sync pass did.
#[derive(Debug, Default)]
pub struct SyncPassSummary {
    pub stories_completed: usize,
    pub stories_failed: usize,
    pub spreads_downloaded: usize,
    /// True when the network policy vetoed the pass entirely.
    pub skipped: bool,
}

pub struct SyncWorker {
    db: Arc<DownloadQueue>,
    cache: Arc<StoryCache>,
    policy: Arc<SyncPolicy>,
    fetcher: Arc<dyn SpreadFetcher>,
    config: SyncConfig,
    wake: Arc<Notify>,
}

impl SyncWorker {
    pub fn new(
        db: Arc<DownloadQueue>,
        cache: Arc<StoryCache>,
        policy: Arc<SyncPolicy>,
        fetcher: Arc<dyn SpreadFetcher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            cache,
            policy,
            fetcher,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle used to wake the worker early (a story was enqueued, or
    /// connectivity came back).
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Long-running worker loop. Recovers crash leftovers on startup, then
    /// runs a pass whenever woken or on the idle poll interval.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!("Sync worker started");

        if let Err(e) = self.db.reset_stuck_downloads() {
            log::warn!("Failed to reset stuck downloads: {}", e);
        }
        if let Err(e) = self.db.retry_failed(self.config.max_retries) {
            log::warn!("Failed to re-queue failed stories: {}", e);
        }

        loop {
            self.run_once(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Sync worker cancelled");
                    break;
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.poll_interval_secs)) => {
                    // Scheduled retries come back into rotation on the idle tick
                    if let Err(e) = self.db.retry_failed(self.config.max_retries) {
                        log::warn!("Failed to re-queue failed stories: {}", e);
                    }
                }
            }
        }
    }

    /// One complete pass over the incomplete queue. Public for direct use by
    /// callers that already know work arrived (and by tests).
    pub async fn run_once(&self, cancel: &CancellationToken) -> SyncPassSummary {
        let mut summary = SyncPassSummary::default();

        if !self.policy.should_sync().await {
            log::debug!("Sync pass skipped by network policy");
            summary.skipped = true;
            return summary;
        }

        let stories = match self.db.get_incomplete_stories() {
            Ok(stories) => stories,
            Err(e) => {
                log::error!("Failed to read incomplete stories: {}", e);
                return summary;
            }
        };

        for story in stories {
            if cancel.is_cancelled() {
                break;
            }
            match self.sync_story(&story.story_id, story.retry_count, cancel).await {
                Ok(spreads) => {
                    summary.stories_completed += 1;
                    summary.spreads_downloaded += spreads;
                }
                Err(e) => {
                    log::warn!("Story '{}' sync failed: {}", story.story_id, e);
                    summary.stories_failed += 1;
                }
            }
        }

        summary
    }

    /// Download every pending spread for one story. Returns the number of
    /// spreads downloaded, or the first error (already recorded durably).
    async fn sync_story(
        &self,
        story_id: &str,
        retry_count: i64,
        cancel: &CancellationToken,
    ) -> Result<usize, String> {
        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .update_story_status(
                story_id,
                DownloadStatus::Downloading,
                &StoryStatusUpdate {
                    started_at: Some(now),
                    ..Default::default()
                },
            )
            .map_err(|e| e.to_string())?;

        let pending = self
            .db
            .get_pending_spreads(story_id)
            .map_err(|e| e.to_string())?;

        let mut downloaded = 0usize;
        for spread in pending {
            if cancel.is_cancelled() {
                // Leave the story downloading; startup recovery re-queues it
                return Err("sync cancelled".to_string());
            }

            self.db
                .update_spread_status(
                    story_id,
                    spread.spread_number,
                    DownloadStatus::Downloading,
                    None,
                    None,
                    None,
                )
                .map_err(|e| e.to_string())?;

            let destination = PathBuf::from(&spread.destination);
            match download_with_retry(self.fetcher.as_ref(), &spread.url, &destination, cancel)
                .await
            {
                Ok(bytes) => {
                    self.db
                        .update_spread_status(
                            story_id,
                            spread.spread_number,
                            DownloadStatus::Completed,
                            Some(bytes),
                            Some(bytes),
                            None,
                        )
                        .map_err(|e| e.to_string())?;
                    self.db
                        .increment_completed_spreads(story_id)
                        .map_err(|e| e.to_string())?;
                    if let Err(e) = self.cache.add_story_bytes(story_id, bytes as u64).await {
                        log::warn!("Failed to record story size for '{}': {}", story_id, e);
                    }
                    downloaded += 1;
                }
                Err(e) => {
                    self.db
                        .update_spread_status(
                            story_id,
                            spread.spread_number,
                            DownloadStatus::Failed,
                            None,
                            None,
                            Some(&e),
                        )
                        .map_err(|db_err| db_err.to_string())?;
                    // Exponential retry schedule, capped
                    let delay = 60i64 << retry_count.clamp(0, 5);
                    self.db
                        .mark_story_failed(story_id, &e, delay)
                        .map_err(|db_err| db_err.to_string())?;
                    return Err(e);
                }
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.db
            .update_story_status(
                story_id,
                DownloadStatus::Completed,
                &StoryStatusUpdate {
                    completed_at: Some(now),
                    ..Default::default()
                },
            )
            .map_err(|e| e.to_string())?;

        log::info!(
            "Story '{}' fully downloaded ({} spreads this pass)",
            story_id,
            downloaded
        );
        Ok(downloaded)
    }
}
