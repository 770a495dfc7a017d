use super::chapter::ChapterRecord;
use super::provider::ProviderVod;
use chrono::{DateTime, Utc};
use common::{Bookmark, MediaInfo, StreamPause, ViewerSample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RECORD_VERSION: u32 = 2;

/// VOD 持久化记录（`<basename>.json`）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VodRecord {
    pub version: u32,
    pub uuid: String,
    pub capture_id: String,
    pub channel_uuid: String,
    pub external: ProviderVod,

    pub stream_title: Option<String>,
    pub stream_resolution: Option<String>,

    pub created: bool,
    pub not_started: bool,
    pub is_capturing: bool,
    pub is_converting: bool,
    pub is_finalized: bool,
    pub failed: bool,
    pub prevent_deletion: bool,
    pub cloud_storage: bool,

    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub capture_started: Option<DateTime<Utc>>,
    pub capture_started2: Option<DateTime<Utc>>,
    pub conversion_started: Option<DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,

    /// 相对 VOD 目录的分段文件名
    pub segments: Vec<String>,
    /// 按分段文件名记录的探测结果
    pub segments_metadata: BTreeMap<String, MediaInfo>,
    /// 旧版整段元数据，仅用于迁移
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<MediaInfo>,
    pub duration: Option<f64>,

    pub chapters: Vec<ChapterRecord>,

    pub stream_number: Option<u32>,
    pub stream_season: Option<String>,
    pub stream_absolute_season: Option<u32>,
    pub stream_absolute_number: Option<u32>,

    pub comment: Option<String>,
    pub export_data: serde_json::Map<String, serde_json::Value>,
    pub viewers: Vec<ViewerSample>,
    #[serde(with = "crate::serde_helpers::complete_pauses")]
    pub stream_pauses: Vec<StreamPause>,
    pub bookmarks: Vec<Bookmark>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_legacy_record_loads() {
        let json = r#"{
            "capture_id": "12345",
            "segments": ["alice_2024.mp4"],
            "is_finalized": true,
            "video_metadata": {"duration": 60.0, "width": 1280, "height": 720, "fps": 30.0, "kind": "video", "size": 10}
        }"#;
        let record: VodRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.capture_id, "12345");
        assert!(record.uuid.is_empty());
        assert!(record.segments_metadata.is_empty());
        assert_eq!(record.video_metadata.as_ref().map(|m| m.duration), Some(60.0));
        assert!(matches!(record.external, ProviderVod::Twitch(_)));
    }
}
