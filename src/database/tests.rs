// Edge-case tests for the download queue
// Run with: cargo test --lib database::tests

#[cfg(test)]
mod queue_tests {
    use crate::database::{DownloadQueue, DownloadStatus, StoryStatusUpdate};
    use tempfile::TempDir;

    fn setup_test_db() -> (DownloadQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = DownloadQueue::new(&db_path).unwrap();
        (db, temp_dir)
    }

    // =========================================================================
    // Story queue lifecycle
    // =========================================================================

    #[test]
    fn test_queue_story_basic() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 12).unwrap();

        let entry = db.get_story("story-1").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Queued);
        assert_eq!(entry.total_spreads, 12);
        assert_eq!(entry.completed_spreads, 0);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.started_at.is_none());
    }

    #[test]
    fn test_requeue_resets_counters() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 12).unwrap();
        db.increment_completed_spreads("story-1").unwrap();
        db.mark_story_failed("story-1", "network down", 60).unwrap();

        db.queue_story("story-1", 12).unwrap();
        let entry = db.get_story("story-1").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Queued);
        assert_eq!(entry.completed_spreads, 0);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn test_get_story_missing_is_none() {
        let (db, _temp) = setup_test_db();
        assert!(db.get_story("never-queued").unwrap().is_none());
    }

    #[test]
    fn test_partial_update_only_touches_supplied_fields() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 8).unwrap();
        let before = db.get_story("story-1").unwrap().unwrap();

        db.update_story_status(
            "story-1",
            DownloadStatus::Downloading,
            &StoryStatusUpdate {
                started_at: Some("2026-01-01T00:00:00Z".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let after = db.get_story("story-1").unwrap().unwrap();
        assert_eq!(after.status, DownloadStatus::Downloading);
        assert_eq!(after.started_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        // Everything not supplied is untouched
        assert_eq!(after.total_spreads, before.total_spreads);
        assert_eq!(after.completed_spreads, before.completed_spreads);
        assert_eq!(after.queued_at, before.queued_at);
        assert_eq!(after.retry_count, before.retry_count);
        assert!(after.completed_at.is_none());
        assert!(after.last_error.is_none());
    }

    #[test]
    fn test_increment_completed_spreads() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 12).unwrap();

        for expected in 1..=5 {
            let count = db.increment_completed_spreads("story-1").unwrap();
            assert_eq!(count, expected);
        }
        let entry = db.get_story("story-1").unwrap().unwrap();
        assert_eq!(entry.completed_spreads, 5);
    }

    #[test]
    fn test_resumability_scenario() {
        // Queue a 12-spread story, complete 5 spreads, then ask what still
        // needs work — the story must come back incomplete, not completed.
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 12).unwrap();
        db.update_story_status(
            "story-1",
            DownloadStatus::Downloading,
            &StoryStatusUpdate::default(),
        )
        .unwrap();
        for _ in 0..5 {
            db.increment_completed_spreads("story-1").unwrap();
        }

        let incomplete = db.get_incomplete_stories().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].completed_spreads, 5);
        assert!(matches!(
            incomplete[0].status,
            DownloadStatus::Queued | DownloadStatus::Downloading
        ));
    }

    #[test]
    fn test_incomplete_excludes_terminal_states() {
        let (db, _temp) = setup_test_db();
        db.queue_story("done", 1).unwrap();
        db.queue_story("dead", 1).unwrap();
        db.queue_story("waiting", 1).unwrap();

        db.update_story_status("done", DownloadStatus::Completed, &StoryStatusUpdate::default())
            .unwrap();
        db.mark_story_failed("dead", "404", 60).unwrap();

        let incomplete = db.get_incomplete_stories().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].story_id, "waiting");
    }

    #[test]
    fn test_incomplete_ordering_is_fifo() {
        let (db, _temp) = setup_test_db();
        // queued_at comes from the wall clock; force distinct values
        db.queue_story("first", 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.queue_story("second", 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.queue_story("third", 1).unwrap();

        let order: Vec<String> = db
            .get_incomplete_stories()
            .unwrap()
            .into_iter()
            .map(|e| e.story_id)
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    // =========================================================================
    // Spread rows
    // =========================================================================

    #[test]
    fn test_spread_lifecycle() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 2).unwrap();
        db.queue_spread("story-1", 1, "https://cdn/1.png", "/cache/s1/spread_1.png")
            .unwrap();
        db.queue_spread("story-1", 2, "https://cdn/2.png", "/cache/s1/spread_2.png")
            .unwrap();

        db.update_spread_status(
            "story-1",
            1,
            DownloadStatus::Completed,
            Some(2048),
            Some(2048),
            None,
        )
        .unwrap();

        let all = db.get_spread_downloads("story-1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bytes_downloaded, 2048);
        assert_eq!(all[0].status, DownloadStatus::Completed);

        let pending = db.get_pending_spreads("story-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].spread_number, 2);
    }

    #[test]
    fn test_pending_includes_failed_spreads() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 2).unwrap();
        db.queue_spread("story-1", 1, "https://cdn/1.png", "/dest/1").unwrap();
        db.queue_spread("story-1", 2, "https://cdn/2.png", "/dest/2").unwrap();

        db.update_spread_status(
            "story-1",
            1,
            DownloadStatus::Failed,
            None,
            None,
            Some("timeout"),
        )
        .unwrap();

        // Failed spreads are still pending work: resume must re-attempt them
        let pending = db.get_pending_spreads("story-1").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_remove_cascades_to_spreads() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 2).unwrap();
        db.queue_spread("story-1", 1, "https://cdn/1.png", "/dest/1").unwrap();
        db.queue_spread("story-1", 2, "https://cdn/2.png", "/dest/2").unwrap();

        db.remove_from_queue("story-1").unwrap();
        assert!(db.get_story("story-1").unwrap().is_none());
        assert!(db.get_spread_downloads("story-1").unwrap().is_empty());
    }

    #[test]
    fn test_spread_update_keeps_bytes_when_not_supplied() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 1).unwrap();
        db.queue_spread("story-1", 1, "https://cdn/1.png", "/dest/1").unwrap();
        db.update_spread_status(
            "story-1",
            1,
            DownloadStatus::Downloading,
            Some(512),
            Some(4096),
            None,
        )
        .unwrap();

        db.update_spread_status("story-1", 1, DownloadStatus::Failed, None, None, Some("reset"))
            .unwrap();

        let spread = &db.get_spread_downloads("story-1").unwrap()[0];
        assert_eq!(spread.bytes_downloaded, 512);
        assert_eq!(spread.bytes_total, Some(4096));
    }

    // =========================================================================
    // Recovery & stats
    // =========================================================================

    #[test]
    fn test_reset_stuck_downloads_flips_only_downloading() {
        let (db, _temp) = setup_test_db();
        db.queue_story("stuck", 1).unwrap();
        db.queue_story("fine", 1).unwrap();
        db.queue_story("done", 1).unwrap();
        db.update_story_status(
            "stuck",
            DownloadStatus::Downloading,
            &StoryStatusUpdate::default(),
        )
        .unwrap();
        db.update_story_status("done", DownloadStatus::Completed, &StoryStatusUpdate::default())
            .unwrap();

        let reset = db.reset_stuck_downloads().unwrap();
        assert_eq!(reset, 1);
        assert_eq!(
            db.get_story("stuck").unwrap().unwrap().status,
            DownloadStatus::Queued
        );
        assert_eq!(
            db.get_story("done").unwrap().unwrap().status,
            DownloadStatus::Completed
        );
    }

    #[test]
    fn test_retry_failed_respects_budget() {
        let (db, _temp) = setup_test_db();
        db.queue_story("fresh-failure", 1).unwrap();
        db.queue_story("exhausted", 1).unwrap();

        db.mark_story_failed("fresh-failure", "timeout", 60).unwrap();
        for _ in 0..3 {
            db.mark_story_failed("exhausted", "timeout", 60).unwrap();
        }

        let retried = db.retry_failed(3).unwrap();
        assert_eq!(retried, 1);
        assert_eq!(
            db.get_story("fresh-failure").unwrap().unwrap().status,
            DownloadStatus::Queued
        );
        assert_eq!(
            db.get_story("exhausted").unwrap().unwrap().status,
            DownloadStatus::Failed
        );
    }

    #[test]
    fn test_mark_failed_records_retry_schedule() {
        let (db, _temp) = setup_test_db();
        db.queue_story("story-1", 1).unwrap();
        db.mark_story_failed("story-1", "503 from image cdn", 120).unwrap();

        let entry = db.get_story("story-1").unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Failed);
        assert_eq!(entry.last_error.as_deref(), Some("503 from image cdn"));
        assert_eq!(entry.retry_count, 1);
        assert!(entry.next_retry_at.is_some());
    }

    #[test]
    fn test_queue_stats() {
        let (db, _temp) = setup_test_db();
        db.queue_story("a", 1).unwrap();
        db.queue_story("b", 1).unwrap();
        db.queue_story("c", 1).unwrap();
        db.update_story_status("b", DownloadStatus::Downloading, &StoryStatusUpdate::default())
            .unwrap();
        db.update_story_status("c", DownloadStatus::Completed, &StoryStatusUpdate::default())
            .unwrap();

        let stats = db.queue_stats().unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.downloading, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn test_unicode_and_special_story_ids() {
        let (db, _temp) = setup_test_db();
        let ids = vec![
            "story-日本語",
            "O'Brien's story",
            "semi;colon",
            "story; DROP TABLE download_queue;--",
        ];
        for id in &ids {
            db.queue_story(id, 1).unwrap();
        }
        for id in &ids {
            assert!(db.get_story(id).unwrap().is_some(), "lost id: {}", id);
        }
    }
}
