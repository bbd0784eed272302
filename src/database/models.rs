use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => Self::Queued,
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

/// Durable per-story download record; the checkpoint a background sync
/// worker resumes from after restart or crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadQueueEntry {
    pub story_id: String,
    pub status: DownloadStatus,
    pub total_spreads: i64,
    pub completed_spreads: i64,
    pub queued_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub next_retry_at: Option<String>,
}

/// One spread's download state within a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadDownloadEntry {
    pub story_id: String,
    pub spread_number: i64,
    pub status: DownloadStatus,
    pub url: String,
    pub destination: String,
    pub bytes_downloaded: i64,
    pub bytes_total: Option<i64>,
    pub error: Option<String>,
}

/// Partial update for a queue row: only supplied fields are written.
#[derive(Debug, Clone, Default)]
pub struct StoryStatusUpdate {
    pub total_spreads: Option<i64>,
    pub completed_spreads: Option<i64>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: Option<i64>,
    pub next_retry_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub downloading: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}
