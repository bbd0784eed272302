pub mod models;

#[cfg(test)]
mod tests;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

pub struct DownloadQueue {
    conn: Arc<Mutex<Connection>>,
}

impl DownloadQueue {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for concurrent reads; foreign_keys so queue removal cascades
        // to spread rows.
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS download_queue (
                story_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'queued',
                total_spreads INTEGER NOT NULL DEFAULT 0,
                completed_spreads INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                last_error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_status_time
                ON download_queue(status, queued_at);

            CREATE TABLE IF NOT EXISTS spread_downloads (
                story_id TEXT NOT NULL,
                spread_number INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                url TEXT NOT NULL,
                destination TEXT NOT NULL,
                bytes_downloaded INTEGER NOT NULL DEFAULT 0,
                bytes_total INTEGER,
                error TEXT,
                PRIMARY KEY (story_id, spread_number),
                FOREIGN KEY (story_id) REFERENCES download_queue(story_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_spreads_story_status
                ON spread_downloads(story_id, status);
        "#,
        )?;

        Ok(())
    }

    // =========================================================================
    // Story queue
    // =========================================================================

    /// Enqueue a story (or re-enqueue: counters and error state reset).
    pub fn queue_story(&self, story_id: &str, total_spreads: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO download_queue
                (story_id, status, total_spreads, completed_spreads, queued_at, retry_count)
             VALUES (?, 'queued', ?, 0, ?, 0)",
            params![story_id, total_spreads, now],
        )?;
        Ok(())
    }

    pub fn get_story(&self, story_id: &str) -> Result<Option<DownloadQueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT story_id, status, total_spreads, completed_spreads, queued_at,
                        started_at, completed_at, last_error, retry_count, next_retry_at
                 FROM download_queue WHERE story_id = ?",
                params![story_id],
                Self::map_queue_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Transition a story's status, writing only the fields supplied in
    /// `updates` alongside it.
    pub fn update_story_status(
        &self,
        story_id: &str,
        status: DownloadStatus,
        updates: &StoryStatusUpdate,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let mut sets = vec!["status = ?".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(status.to_string())];

        if let Some(v) = updates.total_spreads {
            sets.push("total_spreads = ?".to_string());
            values.push(Box::new(v));
        }
        if let Some(v) = updates.completed_spreads {
            sets.push("completed_spreads = ?".to_string());
            values.push(Box::new(v));
        }
        if let Some(ref v) = updates.started_at {
            sets.push("started_at = ?".to_string());
            values.push(Box::new(v.clone()));
        }
        if let Some(ref v) = updates.completed_at {
            sets.push("completed_at = ?".to_string());
            values.push(Box::new(v.clone()));
        }
        if let Some(ref v) = updates.last_error {
            sets.push("last_error = ?".to_string());
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = updates.retry_count {
            sets.push("retry_count = ?".to_string());
            values.push(Box::new(v));
        }
        if let Some(ref v) = updates.next_retry_at {
            sets.push("next_retry_at = ?".to_string());
            values.push(Box::new(v.clone()));
        }

        values.push(Box::new(story_id.to_string()));
        let sql = format!(
            "UPDATE download_queue SET {} WHERE story_id = ?",
            sets.join(", ")
        );
        conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Atomic in-place increment; never a read-then-write-full-value cycle,
    /// so concurrent spread completions cannot clobber each other.
    pub fn increment_completed_spreads(&self, story_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE download_queue SET completed_spreads = completed_spreads + 1
             WHERE story_id = ?",
            params![story_id],
        )?;
        let count = conn.query_row(
            "SELECT completed_spreads FROM download_queue WHERE story_id = ?",
            params![story_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_queued_stories(&self) -> Result<Vec<DownloadQueueEntry>> {
        self.stories_with_status(&["queued"])
    }

    /// Queued ∪ downloading, oldest enqueue first (FIFO fairness). The
    /// resume entry point: a worker restarting after a crash re-attempts
    /// exactly these.
    pub fn get_incomplete_stories(&self) -> Result<Vec<DownloadQueueEntry>> {
        self.stories_with_status(&["queued", "downloading"])
    }

    fn stories_with_status(&self, statuses: &[&str]) -> Result<Vec<DownloadQueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT story_id, status, total_spreads, completed_spreads, queued_at,
                    started_at, completed_at, last_error, retry_count, next_retry_at
             FROM download_queue
             WHERE status IN ({})
             ORDER BY queued_at ASC",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(statuses.iter()),
                Self::map_queue_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Remove a story from the queue; its spread rows go with it.
    pub fn remove_from_queue(&self, story_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM download_queue WHERE story_id = ?",
            params![story_id],
        )?;
        Ok(())
    }

    fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadQueueEntry> {
        Ok(DownloadQueueEntry {
            story_id: row.get(0)?,
            status: row.get::<_, String>(1)?.into(),
            total_spreads: row.get(2)?,
            completed_spreads: row.get(3)?,
            queued_at: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            last_error: row.get(7)?,
            retry_count: row.get(8)?,
            next_retry_at: row.get(9)?,
        })
    }

    // =========================================================================
    // Spread downloads
    // =========================================================================

    pub fn queue_spread(
        &self,
        story_id: &str,
        spread_number: i64,
        url: &str,
        destination: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO spread_downloads
                (story_id, spread_number, status, url, destination, bytes_downloaded)
             VALUES (?, ?, 'queued', ?, ?, 0)",
            params![story_id, spread_number, url, destination],
        )?;
        Ok(())
    }

    pub fn update_spread_status(
        &self,
        story_id: &str,
        spread_number: i64,
        status: DownloadStatus,
        bytes_downloaded: Option<i64>,
        bytes_total: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE spread_downloads SET
                status = ?,
                bytes_downloaded = COALESCE(?, bytes_downloaded),
                bytes_total = COALESCE(?, bytes_total),
                error = ?
             WHERE story_id = ? AND spread_number = ?",
            params![
                status.to_string(),
                bytes_downloaded,
                bytes_total,
                error,
                story_id,
                spread_number
            ],
        )?;
        Ok(())
    }

    pub fn get_spread_downloads(&self, story_id: &str) -> Result<Vec<SpreadDownloadEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT story_id, spread_number, status, url, destination,
                    bytes_downloaded, bytes_total, error
             FROM spread_downloads WHERE story_id = ?
             ORDER BY spread_number ASC",
        )?;
        let entries = stmt
            .query_map(params![story_id], Self::map_spread_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Spreads still needing work for a story: everything not yet completed,
    /// in spread order.
    pub fn get_pending_spreads(&self, story_id: &str) -> Result<Vec<SpreadDownloadEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT story_id, spread_number, status, url, destination,
                    bytes_downloaded, bytes_total, error
             FROM spread_downloads
             WHERE story_id = ? AND status != 'completed'
             ORDER BY spread_number ASC",
        )?;
        let entries = stmt
            .query_map(params![story_id], Self::map_spread_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn map_spread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpreadDownloadEntry> {
        Ok(SpreadDownloadEntry {
            story_id: row.get(0)?,
            spread_number: row.get(1)?,
            status: row.get::<_, String>(2)?.into(),
            url: row.get(3)?,
            destination: row.get(4)?,
            bytes_downloaded: row.get(5)?,
            bytes_total: row.get(6)?,
            error: row.get(7)?,
        })
    }

    // =========================================================================
    // Recovery & stats
    // =========================================================================

    /// Reset rows stuck in "downloading" back to "queued" (recovery after a
    /// crash or kill mid-download). Spread rows are reset the same way.
    pub fn reset_stuck_downloads(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let stories = conn.execute(
            "UPDATE download_queue SET status = 'queued', started_at = NULL
             WHERE status = 'downloading'",
            [],
        )?;
        conn.execute(
            "UPDATE spread_downloads SET status = 'queued' WHERE status = 'downloading'",
            [],
        )?;
        if stories > 0 {
            log::info!("Reset {} stuck downloading stories to queued", stories);
        }
        Ok(stories)
    }

    /// Re-queue failed stories whose retry budget is not exhausted.
    pub fn retry_failed(&self, max_retries: i32) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE download_queue SET status = 'queued', started_at = NULL
             WHERE status = 'failed' AND retry_count < ?",
            params![max_retries],
        )?;
        if count > 0 {
            log::info!("Reset {} failed stories to queued for retry", count);
        }
        Ok(count)
    }

    /// Record a story failure with its retry schedule.
    pub fn mark_story_failed(&self, story_id: &str, error: &str, retry_delay_secs: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let next_retry = (chrono::Utc::now() + chrono::Duration::seconds(retry_delay_secs)).to_rfc3339();
        conn.execute(
            "UPDATE download_queue SET
                status = 'failed',
                last_error = ?,
                retry_count = retry_count + 1,
                next_retry_at = ?
             WHERE story_id = ?",
            params![error, next_retry, story_id],
        )?;
        Ok(())
    }

    /// Drop every queue row (spread rows cascade). Test-isolation lifecycle.
    pub fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM download_queue", [])?;
        Ok(())
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let count = |status: &str| -> Result<i64> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM download_queue WHERE status = ?",
                params![status],
                |row| row.get(0),
            )?)
        };
        let queued = count("queued")?;
        let downloading = count("downloading")?;
        let completed = count("completed")?;
        let failed = count("failed")?;
        Ok(QueueStats {
            queued,
            downloading,
            completed,
            failed,
            total: queued + downloading + completed + failed,
        })
    }
}
