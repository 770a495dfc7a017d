#[cfg(test)]
mod tests {
    use crate::channel::{Channel, ChannelConfig};
    use crate::coordinator::{ArchiveHandle, Command, Coordinator};
    use crate::jobs::{capture_job_name, convert_job_name};
    use crate::testing::{stream_event, ts, Harness};
    use crate::vod::Vod;
    use crate::watcher::{WatchEvent, WatchEventKind};
    use common::{ArchiveError, Provider, StreamEventType, EVENT_VOD_REMOVED};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_capture_convert_finalize() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;

        h.archive
            .handle_stream_event(stream_event(StreamEventType::Online, "alice", "1001", ts(10, 0)))
            .await
            .unwrap();
        let vod_uuid = h.archive.registry.vods_by_channel(&channel_uuid)[0].uuid.clone();
        let basename = {
            let vod = h.vod(&vod_uuid);
            assert!(vod.is_capturing);
            assert!(!vod.not_started);
            assert!(vod.raw_capture_path().exists());
            assert_eq!(vod.basename, "alice_2024-01-01T10_00_00Z_1001");
            assert_eq!(vod.stream_number, Some(1));
            vod.basename.clone()
        };
        assert!(h.supervisor.started_names().contains(&capture_job_name(&basename)));

        h.supervisor.finish(&capture_job_name(&basename), true);
        h.pump().await;
        {
            let vod = h.vod(&vod_uuid);
            assert!(!vod.is_capturing);
            assert!(vod.is_converting);
            assert!(vod.capture_started2.is_some());
        }
        assert!(h.supervisor.started_names().contains(&convert_job_name(&basename)));

        h.pump().await;
        let vod = h.vod(&vod_uuid);
        assert!(vod.is_finalized);
        assert!(!vod.is_converting);
        assert_eq!(vod.segments_raw, vec![format!("{}.mp4", basename)]);
        assert!(!vod.raw_capture_path().exists());
        assert!(vod.json_path().exists());
        assert!(vod.path_with_suffix("-llc-edl.csv").exists());
        assert!(vod.path_with_suffix(".chapters.vtt").exists());
        assert_eq!(vod.duration(), Some(300.0));
        assert_eq!(vod.chapters.len(), 1);
        assert_eq!(vod.chapters[0].title, "Morning stream");
        assert_eq!(vod.stream_resolution.as_deref(), Some("1920x1080"));

        let reloaded = Vod::load(&vod.json_path()).await.unwrap();
        assert!(reloaded.is_finalized);
        assert_eq!(reloaded.segments_raw, vod.segments_raw);

        // 一致的 VOD 不再触发修复
        assert!(h.archive.reconcile(&vod_uuid, "test").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_and_concurrent_online_events() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;

        for capture_id in ["1001", "1001", "1002"] {
            h.archive
                .handle_stream_event(stream_event(StreamEventType::Online, "alice", capture_id, ts(10, 0)))
                .await
                .unwrap();
        }
        let vods = h.archive.registry.vods_by_channel(&channel_uuid);
        assert_eq!(vods.len(), 1);
        assert_eq!(vods[0].capture_id, "1001");
    }

    #[tokio::test]
    async fn test_unknown_channel_event_rejected() {
        let mut h = Harness::new();
        let result = h
            .archive
            .handle_stream_event(stream_event(StreamEventType::Online, "nobody", "1", ts(10, 0)))
            .await;
        assert!(matches!(result, Err(ArchiveError::ChannelNotFound(_))));
    }

    #[tokio::test]
    async fn test_title_filter_skips_capture() {
        let mut h = Harness::new();
        let mut config = ChannelConfig::new(Provider::Twitch, "alice");
        config.match_filters = vec!["speedrun".to_string()];
        let channel_uuid = h.archive.add_channel(config).await.unwrap();

        h.archive
            .handle_stream_event(stream_event(StreamEventType::Online, "alice", "1", ts(10, 0)))
            .await
            .unwrap();
        assert!(h.archive.registry.vods_by_channel(&channel_uuid).is_empty());
    }

    #[tokio::test]
    async fn test_update_event_adds_chapter() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        h.archive
            .handle_stream_event(stream_event(StreamEventType::Online, "alice", "1", ts(10, 0)))
            .await
            .unwrap();

        let mut update = stream_event(StreamEventType::Update, "alice", "1", ts(10, 30));
        update.category_id = Some("27471".to_string());
        update.category_name = Some("Minecraft".to_string());
        h.archive.handle_stream_event(update.clone()).await.unwrap();
        // 相同分类不重复添加
        h.archive.handle_stream_event(update).await.unwrap();

        let vod = h.archive.registry.vods_by_channel(
            &h.archive.registry.find_channel("alice").unwrap().uuid,
        )[0];
        assert_eq!(vod.chapters.len(), 2);
        assert_eq!(vod.chapters[1].game_name(), Some("Minecraft"));
        assert_eq!(vod.chapters[0].duration, Some(1800.0));
    }

    #[tokio::test]
    async fn test_stale_capture_after_restart_is_recovered() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        h.archive
            .handle_stream_event(stream_event(StreamEventType::Online, "alice", "1001", ts(10, 0)))
            .await
            .unwrap();
        let vod_uuid = h.archive.registry.vods_by_channel(&channel_uuid)[0].uuid.clone();

        // 进程退出前未来得及结束采集
        let mut h = h.restart();
        h.supervisor.set_hold_remux(true);
        assert_eq!(h.archive.load_channels().await.unwrap(), 1);

        let basename = {
            let vod = h.vod(&vod_uuid);
            assert!(!vod.is_capturing);
            assert!(vod.is_converting);
            assert!(!vod.failed);
            vod.basename.clone()
        };

        h.supervisor.finish(&convert_job_name(&basename), true);
        h.pump().await;
        let vod = h.vod(&vod_uuid);
        assert!(vod.is_finalized);
        assert!(!vod.is_converting);
        assert_eq!(vod.segments.len(), 1);
        assert!(!vod.raw_capture_path().exists());
    }

    #[tokio::test]
    async fn test_failed_remux_keeps_raw_capture() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        h.supervisor.set_remux_success(false);
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;

        let vod = h.vod(&vod_uuid);
        assert!(!vod.is_finalized);
        assert!(!vod.is_converting);
        assert!(vod.raw_capture_path().exists());
        assert!(vod.segments.is_empty());
        assert!(vod.failed);
    }

    #[tokio::test]
    async fn test_finalized_without_segments_rebuilds_from_disk() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;

        let (vod, _) = h.archive.vod_with_context(&vod_uuid).unwrap();
        let basename = vod.basename.clone();
        vod.segments_raw.clear();
        vod.parse_segments().unwrap();
        std::fs::write(vod.raw_capture_path(), b"raw").unwrap();
        std::fs::write(vod.path_with_suffix("_chat.mp4"), b"chat").unwrap();

        assert!(h.archive.reconcile(&vod_uuid, "test").await.unwrap());
        let vod = h.vod(&vod_uuid);
        assert_eq!(vod.segments_raw, vec![format!("{}.mp4", basename)]);
        assert!(vod.is_finalized);
    }

    #[tokio::test]
    async fn test_rename_moves_every_file_and_database_entry() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        let old_json = h.vod(&vod_uuid).json_path();

        h.archive.rename_vod(&vod_uuid, "alice_renamed").await.unwrap();

        let vod = h.vod(&vod_uuid);
        assert_eq!(vod.basename, "alice_renamed");
        assert!(!old_json.exists());
        assert!(vod.json_path().exists());
        assert!(vod.path_with_suffix(".mp4").exists());
        assert!(vod.path_with_suffix("-ffmpeg-chapters.txt").exists());
        assert_eq!(vod.segments_raw, vec!["alice_renamed.mp4".to_string()]);
        assert!(!vod.segments[0].deleted);

        let entry = Channel::vods_db_entry(&h.archive.config, &vod.json_path());
        let channel = h.archive.registry.channel(&channel_uuid).unwrap();
        assert_eq!(channel.vods_raw, vec![entry]);

        let invalid = h.archive.rename_vod(&vod_uuid, "bad:name").await;
        assert!(matches!(invalid, Err(ArchiveError::InvalidBasename(_))));
        assert_eq!(h.vod(&vod_uuid).basename, "alice_renamed");
    }

    #[tokio::test]
    async fn test_protected_vod_is_never_deleted() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        h.archive.registry.vod_mut(&vod_uuid).unwrap().prevent_deletion = true;
        let files = h.vod(&vod_uuid).associated_files();

        let result = h.archive.delete_vod(&vod_uuid).await;
        assert!(matches!(result, Err(ArchiveError::DeletionPrevented(_))));
        assert!(h.archive.registry.vod(&vod_uuid).is_some());
        assert!(files.iter().all(|f| f.exists()));
    }

    #[tokio::test]
    async fn test_delete_all_reports_per_vod_outcome() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let kept = h.record("alice", "1001", ts(10, 0)).await;
        let deleted = h.record("alice", "1002", ts(14, 0)).await;
        h.archive.registry.vod_mut(&kept).unwrap().prevent_deletion = true;
        let deleted_json = h.vod(&deleted).json_path();

        let report = h.archive.delete_all_vods(&channel_uuid).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(h.archive.registry.vod(&kept).is_some());
        assert!(h.archive.registry.vod(&deleted).is_none());
        assert!(!deleted_json.exists());
        assert_eq!(h.archive.registry.channel(&channel_uuid).unwrap().vods_raw.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.dispatcher.events().iter().any(|e| e == EVENT_VOD_REMOVED));
    }

    #[tokio::test]
    async fn test_delete_all_on_empty_channel_is_invalid() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let result = h.archive.delete_all_vods(&channel_uuid).await;
        assert!(matches!(result, Err(ArchiveError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_channel_deletion_refuses_shared_root() {
        let mut h = Harness::with_config(|c| c.storage.channel_folders = false);
        let channel_uuid = h.add_channel("alice").await;
        let result = h.archive.delete_channel(&channel_uuid, true).await;
        assert!(matches!(result, Err(ArchiveError::RootFolderDeletion(_))));
        assert!(h.archive.registry.channel(&channel_uuid).is_some());
    }

    #[tokio::test]
    async fn test_channel_deletion_without_files_detaches() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        let json = h.vod(&vod_uuid).json_path();

        let report = h.archive.delete_channel(&channel_uuid, false).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(h.archive.registry.channel(&channel_uuid).is_none());
        assert!(h.archive.registry.vod(&vod_uuid).is_none());
        assert!(json.exists());

        let saved = std::fs::read_to_string(h.archive.config.channels_config_path()).unwrap();
        let configs: Vec<ChannelConfig> = serde_json::from_str(&saved).unwrap();
        assert!(configs.is_empty());
    }

    #[tokio::test]
    async fn test_channels_and_vods_survive_restart() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;

        let mut h = h.restart();
        assert_eq!(h.archive.load_channels().await.unwrap(), 1);
        let vods = h.archive.registry.vods_by_channel(&channel_uuid);
        assert_eq!(vods.len(), 1);
        assert_eq!(vods[0].uuid, vod_uuid);
        assert!(vods[0].is_finalized);
    }

    #[tokio::test]
    async fn test_missing_database_triggers_rescan() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        std::fs::remove_file(h.archive.config.vods_db_path("alice")).unwrap();

        let mut h = h.restart();
        h.archive.load_channels().await.unwrap();
        assert!(h.archive.registry.vod(&vod_uuid).is_some());
        assert!(h.archive.config.vods_db_path("alice").exists());
    }

    #[tokio::test]
    async fn test_externally_removed_record_is_dropped() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        let json = h.vod(&vod_uuid).json_path();
        std::fs::remove_file(&json).unwrap();

        h.archive
            .handle_watch_event(WatchEvent {
                owner: vod_uuid.clone(),
                path: json,
                kind: WatchEventKind::Removed,
            })
            .await
            .unwrap();
        assert!(h.archive.registry.vod(&vod_uuid).is_none());
        assert!(h.archive.registry.channel(&channel_uuid).unwrap().vods_raw.is_empty());
    }

    #[tokio::test]
    async fn test_retention_deletes_oldest() {
        let mut h = Harness::with_config(|c| c.retention.vods_to_keep = 1);
        let channel_uuid = h.add_channel("alice").await;
        let first = h.record("alice", "1001", ts(8, 0)).await;
        let second = h.record("alice", "1002", ts(12, 0)).await;

        // 刚定型的 VOD 不参与计数
        assert!(h.archive.registry.vod(&first).is_some());
        assert!(h.archive.registry.vod(&second).is_some());

        let third = h.record("alice", "1003", ts(14, 0)).await;
        assert!(h.archive.registry.vod(&first).is_none());
        assert!(h.archive.registry.vod(&second).is_some());
        assert!(h.archive.registry.vod(&third).is_some());
        assert_eq!(h.archive.registry.vods_by_channel(&channel_uuid).len(), 2);
    }

    #[tokio::test]
    async fn test_short_chapters_pruned_after_capture() {
        let mut h = Harness::with_config(|c| c.retention.min_chapter_duration = 60.0);
        let channel_uuid = h.add_channel("alice").await;
        h.archive
            .handle_stream_event(stream_event(StreamEventType::Online, "alice", "1001", ts(10, 0)))
            .await
            .unwrap();
        let vod_uuid = h.archive.registry.vods_by_channel(&channel_uuid)[0].uuid.clone();

        let mut blip = stream_event(StreamEventType::Update, "alice", "1001", ts(10, 30));
        blip.category_id = Some("1".to_string());
        blip.category_name = Some("Tetris".to_string());
        h.archive.handle_stream_event(blip).await.unwrap();

        let at = ts(10, 30) + chrono::Duration::seconds(20);
        let mut main = stream_event(StreamEventType::Update, "alice", "1001", at);
        main.category_id = Some("2".to_string());
        main.category_name = Some("Chess".to_string());
        h.archive.handle_stream_event(main).await.unwrap();

        h.archive
            .handle_stream_event(stream_event(StreamEventType::Offline, "alice", "1001", ts(11, 0)))
            .await
            .unwrap();
        let basename = h.vod(&vod_uuid).basename.clone();
        h.supervisor.finish(&capture_job_name(&basename), true);
        h.pump().await;
        h.pump().await;

        let vod = h.vod(&vod_uuid);
        assert!(vod.is_finalized);
        let games: Vec<String> = vod
            .chapters
            .iter()
            .map(|c| c.game_name().unwrap_or_default().to_string())
            .collect();
        assert_eq!(games, vec!["Just Chatting".to_string(), "Chess".to_string()]);

        let saved = Vod::load(&vod.json_path()).await.unwrap();
        assert_eq!(saved.chapters.len(), 2);
    }

    #[tokio::test]
    async fn test_illegal_basename_rename_survives_restarts() {
        let mut h = Harness::new();
        let channel_uuid = h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        let (directory, basename) = {
            let vod = h.vod(&vod_uuid);
            (vod.directory.clone(), vod.basename.clone())
        };

        // 旧版本留下的非法文件名
        for entry in std::fs::read_dir(&directory).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            if let Some(rest) = name.strip_prefix(basename.as_str()) {
                std::fs::rename(&path, directory.join(format!("alice:bad{}", rest))).unwrap();
            }
        }
        let json = directory.join("alice:bad.json");
        let mut record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        record["segments"] = serde_json::json!(["alice:bad.mp4"]);
        record["segments_metadata"] = serde_json::json!({});
        std::fs::write(&json, serde_json::to_string(&record).unwrap()).unwrap();
        let db = h.archive.config.vods_db_path("alice");
        let entries = vec![Channel::vods_db_entry(&h.archive.config, &json)];
        std::fs::write(&db, serde_json::to_string(&entries).unwrap()).unwrap();

        let mut h = h.restart();
        h.archive.load_channels().await.unwrap();
        let fixed_json = {
            let vod = h.vod(&vod_uuid);
            assert_eq!(vod.basename, "alice_bad");
            assert_eq!(vod.segments.len(), 1);
            assert!(vod.json_path().exists());
            vod.json_path()
        };
        let entries: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&db).unwrap()).unwrap();
        assert_eq!(entries, vec![Channel::vods_db_entry(&h.archive.config, &fixed_json)]);

        let mut h = h.restart();
        h.archive.load_channels().await.unwrap();
        assert_eq!(h.archive.registry.vods_by_channel(&channel_uuid).len(), 1);
        assert_eq!(h.vod(&vod_uuid).basename, "alice_bad");
    }

    #[tokio::test]
    async fn test_archive_moves_to_saved_folder() {
        let mut h = Harness::new();
        h.add_channel("alice").await;
        let vod_uuid = h.record("alice", "1001", ts(10, 0)).await;
        let basename = h.vod(&vod_uuid).basename.clone();

        let destination = h.archive.archive_vod(&vod_uuid).await.unwrap();
        assert!(destination.join(format!("{}.json", basename)).exists());
        assert!(destination.join(format!("{}.mp4", basename)).exists());
        assert!(h.archive.registry.vod(&vod_uuid).is_none());
    }

    #[tokio::test]
    async fn test_coordinator_serves_commands() {
        let h = Harness::new();
        let Harness { dir: _dir, archive, events, watch_events, .. } = h;
        let handle = ArchiveHandle::new(archive.services.events.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Coordinator::new(archive, events, watch_events, cancel.clone()).run());

        let added = handle
            .command(Command::AddChannel(ChannelConfig::new(Provider::Twitch, "bob")))
            .await;
        assert!(added.success, "{}", added.message);

        let missing = handle
            .command(Command::DeleteVod { vod_uuid: "missing".to_string() })
            .await;
        assert!(!missing.success);

        assert!(handle.shutdown());
        let archive = task.await.unwrap();
        assert!(archive.registry.find_channel("bob").is_some());
    }
}
