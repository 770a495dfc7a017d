use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EVENT_VOD_UPDATED: &str = "vod_updated";
pub const EVENT_VOD_REMOVED: &str = "vod_removed";
pub const EVENT_CHANNEL_UPDATED: &str = "channel_updated";

/// 直播事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventType {
    Online,
    Offline,
    Update,
}

/// 平台推送的直播事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    /// 频道标识（login/channel id/slug）
    pub channel_identifier: String,
    pub timestamp: DateTime<Utc>,
    /// 事件关联的直播 ID，用于识别重复投递
    #[serde(default)]
    pub capture_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
}

/// 对外广播消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub event: String,
    pub payload: serde_json::Value,
}
