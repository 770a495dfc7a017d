use super::chapter::ChapterDetails;
use common::Provider;
use serde::{Deserialize, Serialize};

/// 平台差异能力
pub trait ProviderCapabilities: Send + Sync {
    fn provider(&self) -> Provider;

    /// 平台侧 VOD 匹配结果
    fn external_vod_id(&self) -> Option<&str>;

    fn external_vod_exists(&self) -> Option<bool>;

    /// 已定型且没有章节时是否由对账补默认章节
    fn requires_default_chapter(&self) -> bool {
        false
    }

    fn default_chapter_details(&self) -> ChapterDetails;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TwitchVod {
    pub twitch_vod_id: Option<String>,
    pub twitch_vod_title: Option<String>,
    pub twitch_vod_duration: Option<f64>,
    pub twitch_vod_exists: Option<bool>,
    pub twitch_vod_muted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct YouTubeVod {
    pub youtube_vod_id: Option<String>,
    pub youtube_vod_exists: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KickVod {
    pub kick_vod_id: Option<String>,
    pub kick_vod_exists: Option<bool>,
}

impl ProviderCapabilities for TwitchVod {
    fn provider(&self) -> Provider {
        Provider::Twitch
    }

    fn external_vod_id(&self) -> Option<&str> {
        self.twitch_vod_id.as_deref()
    }

    fn external_vod_exists(&self) -> Option<bool> {
        self.twitch_vod_exists
    }

    fn requires_default_chapter(&self) -> bool {
        true
    }

    fn default_chapter_details(&self) -> ChapterDetails {
        ChapterDetails::Twitch {
            game_id: None,
            game_name: None,
            box_art_url: None,
            viewer_count: None,
            is_mature: false,
        }
    }
}

impl ProviderCapabilities for YouTubeVod {
    fn provider(&self) -> Provider {
        Provider::YouTube
    }

    fn external_vod_id(&self) -> Option<&str> {
        self.youtube_vod_id.as_deref()
    }

    fn external_vod_exists(&self) -> Option<bool> {
        self.youtube_vod_exists
    }

    fn default_chapter_details(&self) -> ChapterDetails {
        ChapterDetails::YouTube
    }
}

impl ProviderCapabilities for KickVod {
    fn provider(&self) -> Provider {
        Provider::Kick
    }

    fn external_vod_id(&self) -> Option<&str> {
        self.kick_vod_id.as_deref()
    }

    fn external_vod_exists(&self) -> Option<bool> {
        self.kick_vod_exists
    }

    fn default_chapter_details(&self) -> ChapterDetails {
        ChapterDetails::Kick {
            category_id: None,
            category_name: None,
        }
    }
}

/// VOD 的平台特有字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderVod {
    Twitch(TwitchVod),
    YouTube(YouTubeVod),
    Kick(KickVod),
}

impl Default for ProviderVod {
    fn default() -> Self {
        ProviderVod::Twitch(TwitchVod::default())
    }
}

impl ProviderVod {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Twitch => ProviderVod::Twitch(TwitchVod::default()),
            Provider::YouTube => ProviderVod::YouTube(YouTubeVod::default()),
            Provider::Kick => ProviderVod::Kick(KickVod::default()),
        }
    }

    pub fn capabilities(&self) -> &dyn ProviderCapabilities {
        match self {
            ProviderVod::Twitch(v) => v,
            ProviderVod::YouTube(v) => v,
            ProviderVod::Kick(v) => v,
        }
    }

    pub fn provider(&self) -> Provider {
        self.capabilities().provider()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
