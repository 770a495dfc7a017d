#[cfg(test)]
mod tests {
    use crate::channel::{Channel, ChannelConfig};
    use crate::context::VodContext;
    use crate::testing::{ts, Harness};
    use crate::vod::{Chapter, ChapterDetails, Vod};
    use common::{ArchiveError, Provider};
    use proptest::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_channel() -> Channel {
        let mut config = ChannelConfig::new(Provider::Twitch, "alice");
        config.uuid = "chan-1".to_string();
        config.display_name = "Alice".to_string();
        Channel::from_config(config)
    }

    fn test_vod(directory: &Path) -> Vod {
        let mut vod = Vod::new("vod-1", "chan-1", "1001", "alice_test", directory, Provider::Twitch);
        vod.not_started = false;
        vod.created_at = Some(ts(10, 0));
        vod.started_at = Some(ts(10, 0));
        vod
    }

    fn chapter(at: chrono::DateTime<chrono::Utc>, title: &str) -> Chapter {
        Chapter::new(
            at,
            title,
            ChapterDetails::Twitch {
                game_id: None,
                game_name: Some(title.to_string()),
                box_art_url: None,
                viewer_count: None,
                is_mature: false,
            },
        )
    }

    #[tokio::test]
    async fn test_save_and_load_keep_state() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");

        let mut vod = test_vod(&folder);
        vod.prevent_deletion = true;
        vod.comment = Some("keep".to_string());
        vod.stream_number = Some(4);
        vod.add_chapter(chapter(ts(10, 0), "Intro"));
        vod.add_stream_pause(ts(10, 5));
        vod.save_json(&ctx, "test").await.unwrap();

        let loaded = Vod::load(&vod.json_path()).await.unwrap();
        assert_eq!(loaded.uuid, "vod-1");
        assert_eq!(loaded.basename, "alice_test");
        assert_eq!(loaded.directory, folder);
        assert_eq!(loaded.capture_id, "1001");
        assert_eq!(loaded.started_at, Some(ts(10, 0)));
        assert!(loaded.prevent_deletion);
        assert_eq!(loaded.comment.as_deref(), Some("keep"));
        assert_eq!(loaded.stream_number, Some(4));
        assert_eq!(loaded.chapters.len(), 1);
        assert_eq!(loaded.chapters[0].game_name(), Some("Intro"));
        // 未结束的暂停不落盘
        assert!(loaded.stream_pauses.is_empty());
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn test_parse_segments_skips_illegal_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alice_test.mp4"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("alice_test_2.mp4"), vec![0u8; 5]).unwrap();

        let mut vod = test_vod(dir.path());
        vod.segments_raw = vec![
            "alice_test.mp4".to_string(),
            "alice_test_2.mp4".to_string(),
            "gone.mp4".to_string(),
            "bad:name.mp4".to_string(),
        ];
        let result = vod.parse_segments();
        assert!(matches!(result, Err(ArchiveError::InvalidBasename(_))));
        assert_eq!(vod.segments.len(), 3);
        assert!(vod.segments[2].deleted);
        assert_eq!(vod.total_size, 15);
    }

    proptest! {
        #[test]
        fn prop_total_size_matches_present_segments(sizes in prop::collection::vec(0usize..64, 1..6)) {
            let dir = TempDir::new().unwrap();
            let mut vod = test_vod(dir.path());
            for (i, size) in sizes.iter().enumerate() {
                let name = format!("alice_test_{}.mp4", i);
                if *size > 0 {
                    std::fs::write(dir.path().join(&name), vec![0u8; *size]).unwrap();
                }
                vod.segments_raw.push(name);
            }
            vod.parse_segments().unwrap();

            let expected: u64 = sizes.iter().map(|s| *s as u64).sum();
            prop_assert_eq!(vod.total_size, expected);
            let present = vod.segments.iter().filter(|s| !s.deleted).count();
            prop_assert_eq!(present, sizes.iter().filter(|s| **s > 0).count());
        }
    }

    #[tokio::test]
    async fn test_rebuild_modes() {
        let h = Harness::with_config(|c| c.storage.vod_folders = true);
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice").join("alice_test");
        std::fs::create_dir_all(&folder).unwrap();
        for name in ["alice_test.mp4", "part2.mp4", "alice_test_chat.mp4", "alice_test.ts", "notes.txt"] {
            std::fs::write(folder.join(name), b"data").unwrap();
        }

        let mut vod = test_vod(&folder);
        vod.rebuild_segment_list(&ctx, false).await.unwrap();
        assert_eq!(vod.segments_raw, vec!["alice_test.mp4".to_string()]);

        vod.rebuild_segment_list(&ctx, true).await.unwrap();
        assert_eq!(
            vod.segments_raw,
            vec!["alice_test.mp4".to_string(), "part2.mp4".to_string()]
        );
        assert!(vod.json_path().exists());
    }

    #[tokio::test]
    async fn test_rebuild_in_shared_folder_ignores_misnamed_files() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("other_vod.mp4"), b"data").unwrap();

        let mut vod = test_vod(&folder);
        let result = vod.rebuild_segment_list(&ctx, true).await;
        assert!(matches!(result, Err(ArchiveError::NoSegmentCandidates(_))));
    }

    #[tokio::test]
    async fn test_delete_segment_variants() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("alice_test.mp4"), b"one").unwrap();
        std::fs::write(folder.join("alice_test_2.mp4"), b"two").unwrap();

        let mut vod = test_vod(&folder);
        vod.add_segment("alice_test.mp4").unwrap();
        vod.add_segment("alice_test_2.mp4").unwrap();

        let out_of_range = vod.delete_segment(&ctx, 5, false).await;
        assert!(matches!(out_of_range, Err(ArchiveError::InvalidParameter(_))));

        vod.delete_segment(&ctx, 0, true).await.unwrap();
        assert!(vod.cloud_storage);
        assert_eq!(vod.segments_raw.len(), 2);
        assert!(!folder.join("alice_test.mp4").exists());
        assert_eq!(vod.total_size, 3);

        vod.delete_segment(&ctx, 1, false).await.unwrap();
        assert_eq!(vod.segments_raw, vec!["alice_test.mp4".to_string()]);
        assert_eq!(vod.total_size, 0);
    }

    #[tokio::test]
    async fn test_rename_collision_leaves_files() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");

        let mut vod = test_vod(&folder);
        vod.save_json(&ctx, "test").await.unwrap();
        std::fs::write(folder.join("alice_test.mp4"), b"data").unwrap();
        vod.add_segment("alice_test.mp4").unwrap();
        std::fs::write(folder.join("alice_new.mp4"), b"other").unwrap();

        let result = vod.change_base_name(&ctx, "alice_new").await;
        assert!(matches!(result, Err(ArchiveError::InvalidParameter(_))));
        assert_eq!(vod.basename, "alice_test");
        assert!(folder.join("alice_test.json").exists());
        assert!(folder.join("alice_test.mp4").exists());
    }

    #[tokio::test]
    async fn test_capture_start_failure_reverts_flag() {
        let h = Harness::new();
        h.supervisor.set_fail_start(true);
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));

        let mut vod = test_vod(&h.archive.config.channel_folder("alice"));
        vod.not_started = true;
        let result = vod.begin_capture(&ctx, ts(10, 1)).await;
        assert!(matches!(result, Err(ArchiveError::JobFailed { .. })));
        assert!(!vod.is_capturing);
        assert!(!vod.not_started);

        let saved = Vod::load(&vod.json_path()).await.unwrap();
        assert!(!saved.is_capturing);
    }

    #[tokio::test]
    async fn test_capture_needs_channel() {
        let h = Harness::new();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, None);
        let mut vod = test_vod(&h.archive.config.channel_folder("alice"));
        let result = vod.begin_capture(&ctx, ts(10, 1)).await;
        assert!(matches!(result, Err(ArchiveError::ChannelNotFound(_))));
        assert!(!vod.is_capturing);
    }

    #[tokio::test]
    async fn test_finalize_writes_exports() {
        let h = Harness::with_config(|c| {
            c.media.create_kodi_nfo = true;
            c.media.contact_sheet = true;
        });
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");

        let mut vod = test_vod(&folder);
        vod.stream_title = Some("Speedrun".to_string());
        vod.save_json(&ctx, "test").await.unwrap();
        std::fs::write(folder.join("alice_test.mp4"), b"data").unwrap();
        std::fs::write(folder.join("alice_test.m3u8"), b"#EXTM3U").unwrap();
        vod.add_segment("alice_test.mp4").unwrap();

        vod.finalize(&ctx).await.unwrap();
        assert!(vod.is_finalized);
        assert!(!vod.path_with_suffix(".m3u8").exists());
        assert_eq!(vod.chapters.len(), 1);
        assert_eq!(vod.chapters[0].title, "Speedrun");
        assert_eq!(vod.chapters[0].duration, Some(300.0));
        assert_eq!(vod.ended_at, Some(ts(10, 5)));

        let nfo = std::fs::read_to_string(vod.path_with_suffix(".nfo")).unwrap();
        assert!(nfo.contains("<title>Speedrun</title>"));
        assert!(vod.path_with_suffix("-contact_sheet.png").exists());
        let ffmeta = std::fs::read_to_string(vod.path_with_suffix("-ffmpeg-chapters.txt")).unwrap();
        assert!(ffmeta.starts_with(";FFMETADATA1"));
    }

    #[tokio::test]
    async fn test_finalize_survives_probe_failure() {
        let h = Harness::new();
        h.probe.set_fail(true);
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));
        let folder = h.archive.config.channel_folder("alice");

        let mut vod = test_vod(&folder);
        vod.save_json(&ctx, "test").await.unwrap();
        std::fs::write(folder.join("alice_test.mp4"), b"data").unwrap();
        vod.add_segment("alice_test.mp4").unwrap();

        vod.finalize(&ctx).await.unwrap();
        assert!(vod.is_finalized);
        assert_eq!(vod.duration(), None);
    }

    #[tokio::test]
    async fn test_remove_short_chapters() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));

        let mut vod = test_vod(&h.archive.config.channel_folder("alice"));
        vod.ended_at = Some(ts(10, 30));
        vod.add_chapter(chapter(ts(10, 0), "Intro"));
        vod.add_chapter(chapter(ts(10, 10), "Blip"));
        vod.add_chapter(chapter(ts(10, 10) + chrono::Duration::seconds(20), "Main"));

        let removed = vod.remove_short_chapters(&ctx, 60.0).await.unwrap();
        assert_eq!(removed, 1);
        let titles: Vec<&str> = vod.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro", "Main"]);
        assert!(vod.json_path().exists());
    }

    #[tokio::test]
    async fn test_chapter_at_minimum_is_removed() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));

        let mut vod = test_vod(&h.archive.config.channel_folder("alice"));
        vod.ended_at = Some(ts(10, 30));
        vod.add_chapter(chapter(ts(10, 0), "Intro"));
        vod.add_chapter(chapter(ts(10, 10), "Exact"));
        vod.add_chapter(chapter(ts(10, 11), "Main"));

        // 恰好 60 秒也算过短
        let removed = vod.remove_short_chapters(&ctx, 60.0).await.unwrap();
        assert_eq!(removed, 1);
        let titles: Vec<&str> = vod.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro", "Main"]);
    }

    #[tokio::test]
    async fn test_delete_files_respects_protection() {
        let h = Harness::new();
        let channel = test_channel();
        let ctx = VodContext::new(&h.archive.config, &h.archive.services, Some(&channel));

        let mut vod = test_vod(&h.archive.config.channel_folder("alice"));
        vod.save_json(&ctx, "test").await.unwrap();
        vod.prevent_deletion = true;
        assert!(matches!(
            vod.delete_files(&ctx).await,
            Err(ArchiveError::DeletionPrevented(_))
        ));
        assert!(vod.json_path().exists());

        vod.prevent_deletion = false;
        vod.delete_files(&ctx).await.unwrap();
        assert!(!vod.json_path().exists());
        assert!(!h.archive.services.watcher.is_watching("vod-1"));
    }
}
