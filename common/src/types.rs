use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 直播平台
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Twitch,
    YouTube,
    Kick,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Twitch => "twitch",
            Provider::YouTube => "youtube",
            Provider::Kick => "kick",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 媒体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// 媒体文件探测信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// 时长（秒）
    pub duration: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub kind: MediaKind,
    pub size: u64,
}

impl MediaInfo {
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

/// 外部进程状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
    Error,
    Unknown,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Running)
    }
}

/// 观众数采样
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewerSample {
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
}

/// 直播暂停区间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamPause {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl StreamPause {
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// 书签
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    pub date: DateTime<Utc>,
    pub name: String,
}

/// 分段公开视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSegment {
    pub basename: String,
    pub filesize: u64,
    pub deleted: bool,
    pub duration: Option<f64>,
}

/// 章节公开视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChapter {
    pub started_at: DateTime<Utc>,
    pub title: String,
    pub offset: Option<f64>,
    pub duration: Option<f64>,
    pub online: bool,
    pub game_id: Option<String>,
    pub game_name: Option<String>,
}

/// VOD 公开视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiVod {
    pub uuid: String,
    pub channel_uuid: String,
    pub capture_id: String,
    pub provider: Provider,
    pub basename: String,
    pub directory: String,

    pub is_capturing: bool,
    pub is_converting: bool,
    pub is_finalized: bool,
    pub failed: bool,
    pub not_started: bool,

    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,

    pub duration: Option<f64>,
    pub total_size: u64,
    pub stream_number: Option<u32>,
    pub stream_season: Option<String>,
    pub stream_absolute_season: Option<u32>,
    pub comment: Option<String>,
    pub prevent_deletion: bool,
    pub cloud_storage: bool,

    pub segments: Vec<ApiSegment>,
    pub chapters: Vec<ApiChapter>,
    pub external: serde_json::Value,
}

/// 频道公开视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChannel {
    pub uuid: String,
    pub provider: Provider,
    pub internal_name: String,
    pub internal_id: String,
    pub display_name: String,
    pub quality: Vec<String>,
    pub is_live: bool,
    pub current_vod: Option<String>,
    pub latest_vod: Option<String>,
    pub vods_size: u64,
    pub vod_count: usize,
    pub current_stream_number: u32,
    pub current_season: String,
}

/// 批量操作结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

/// 操作结果（成功标志与可读消息）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}
