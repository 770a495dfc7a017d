use chrono::{DateTime, Utc};
use common::{ApiChapter, Provider};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 各平台特有的章节字段
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterDetails {
    Base,
    Twitch {
        game_id: Option<String>,
        game_name: Option<String>,
        box_art_url: Option<String>,
        viewer_count: Option<u64>,
        is_mature: bool,
    },
    YouTube,
    Kick {
        category_id: Option<String>,
        category_name: Option<String>,
    },
}

/// 章节（分类/游戏切换标记）
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub started_at: DateTime<Utc>,
    pub title: String,
    pub online: bool,
    /// 相对 VOD 开始的偏移（秒）
    pub offset: Option<f64>,
    /// 时长（秒）
    pub duration: Option<f64>,
    pub details: ChapterDetails,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

impl Chapter {
    pub fn new(started_at: DateTime<Utc>, title: impl Into<String>, details: ChapterDetails) -> Self {
        Self {
            started_at,
            title: title.into(),
            online: true,
            offset: None,
            duration: None,
            details,
        }
    }

    pub fn game_id(&self) -> Option<&str> {
        match &self.details {
            ChapterDetails::Twitch { game_id, .. } => game_id.as_deref(),
            ChapterDetails::Kick { category_id, .. } => category_id.as_deref(),
            _ => None,
        }
    }

    pub fn game_name(&self) -> Option<&str> {
        match &self.details {
            ChapterDetails::Twitch { game_name, .. } => game_name.as_deref(),
            ChapterDetails::Kick { category_name, .. } => category_name.as_deref(),
            _ => None,
        }
    }

    /// 计算偏移与时长
    ///
    /// 结束点取下一章节开始时间，没有则取 VOD 结束时间。
    /// 章节早于 VOD 开始时偏移钳制为 0，时长从 VOD 开始算起。
    pub fn calculate_duration_and_offset(
        &mut self,
        vod_started_at: DateTime<Utc>,
        vod_ended_at: Option<DateTime<Utc>>,
        next_started_at: Option<DateTime<Utc>>,
    ) {
        let effective_start = self.started_at.max(vod_started_at);
        self.apply_window(effective_start, vod_started_at, next_started_at.or(vod_ended_at));
    }

    fn apply_window(
        &mut self,
        effective_start: DateTime<Utc>,
        vod_started_at: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) {
        self.offset = Some(seconds_between(vod_started_at, effective_start));
        self.duration = end.map(|end| seconds_between(effective_start, end).max(0.0));

        if self.duration.is_none() {
            warn!("Chapter '{}' has no end reference, duration left unset", self.title);
        }
    }

    pub fn to_api(&self) -> ApiChapter {
        ApiChapter {
            started_at: self.started_at,
            title: self.title.clone(),
            offset: self.offset,
            duration: self.duration,
            online: self.online,
            game_id: self.game_id().map(str::to_string),
            game_name: self.game_name().map(str::to_string),
        }
    }

    pub fn to_record(&self) -> ChapterRecord {
        let mut record = ChapterRecord {
            started_at: self.started_at,
            title: self.title.clone(),
            online: self.online,
            offset: self.offset,
            duration: self.duration,
            ..Default::default()
        };
        match &self.details {
            ChapterDetails::Base => {}
            ChapterDetails::Twitch { game_id, game_name, box_art_url, viewer_count, is_mature } => {
                record.provider = Some(Provider::Twitch);
                record.game_id = game_id.clone();
                record.game_name = game_name.clone();
                record.box_art_url = box_art_url.clone();
                record.viewer_count = *viewer_count;
                record.is_mature = *is_mature;
            }
            ChapterDetails::YouTube => record.provider = Some(Provider::YouTube),
            ChapterDetails::Kick { category_id, category_name } => {
                record.provider = Some(Provider::Kick);
                record.category_id = category_id.clone();
                record.category_name = category_name.clone();
            }
        }
        record
    }

    pub fn from_record(record: ChapterRecord) -> Self {
        let details = match record.provider {
            None => ChapterDetails::Base,
            Some(Provider::Twitch) => ChapterDetails::Twitch {
                game_id: record.game_id,
                game_name: record.game_name,
                box_art_url: record.box_art_url,
                viewer_count: record.viewer_count,
                is_mature: record.is_mature,
            },
            Some(Provider::YouTube) => ChapterDetails::YouTube,
            Some(Provider::Kick) => ChapterDetails::Kick {
                category_id: record.category_id,
                category_name: record.category_name,
            },
        };
        Self {
            started_at: record.started_at,
            title: record.title,
            online: record.online,
            offset: record.offset,
            duration: record.duration,
            details,
        }
    }
}

/// 按开始时间排序并依次计算，章节首尾相接铺满时间轴
///
/// 第一个章节总是从 VOD 开始处算起。
pub fn calculate_chapters(
    chapters: &mut [Chapter],
    vod_started_at: DateTime<Utc>,
    vod_ended_at: Option<DateTime<Utc>>,
) {
    chapters.sort_by_key(|c| c.started_at);
    let starts: Vec<DateTime<Utc>> = chapters.iter().map(|c| c.started_at).collect();
    for (i, chapter) in chapters.iter_mut().enumerate() {
        let next = starts.get(i + 1).copied();
        if i == 0 {
            chapter.apply_window(vod_started_at, vod_started_at, next.or(vod_ended_at));
        } else {
            chapter.calculate_duration_and_offset(vod_started_at, vod_ended_at, next);
        }
    }
}

/// 章节持久化格式，平台字段平铺并以 provider 区分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_art_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u64>,
    #[serde(default)]
    pub is_mature: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

fn default_online() -> bool {
    true
}

impl Default for ChapterRecord {
    fn default() -> Self {
        Self {
            started_at: DateTime::<Utc>::default(),
            title: String::new(),
            online: true,
            provider: None,
            game_id: None,
            game_name: None,
            box_art_url: None,
            viewer_count: None,
            is_mature: false,
            category_id: None,
            category_name: None,
            offset: None,
            duration: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn twitch(started_at: DateTime<Utc>, game: &str) -> Chapter {
        Chapter::new(
            started_at,
            "Stream title",
            ChapterDetails::Twitch {
                game_id: Some("1".to_string()),
                game_name: Some(game.to_string()),
                box_art_url: None,
                viewer_count: None,
                is_mature: false,
            },
        )
    }

    #[test]
    fn test_two_chapters_tile_vod() {
        let start = t0();
        let mut chapters = vec![
            twitch(start + Duration::seconds(120), "Second"),
            twitch(start, "First"),
        ];
        calculate_chapters(&mut chapters, start, Some(start + Duration::seconds(300)));

        assert_eq!(chapters[0].game_name(), Some("First"));
        assert_eq!(chapters[0].offset, Some(0.0));
        assert_eq!(chapters[0].duration, Some(120.0));
        assert_eq!(chapters[1].offset, Some(120.0));
        assert_eq!(chapters[1].duration, Some(180.0));
    }

    #[test]
    fn test_clock_skew_clamps_offset() {
        let start = t0();
        let mut chapters = vec![
            twitch(start - Duration::seconds(5), "Early"),
            twitch(start + Duration::seconds(60), "Later"),
        ];
        calculate_chapters(&mut chapters, start, Some(start + Duration::seconds(100)));

        assert_eq!(chapters[0].offset, Some(0.0));
        assert_eq!(chapters[0].duration, Some(60.0));
        assert_eq!(chapters[1].offset, Some(60.0));
    }

    #[test]
    fn test_late_first_chapter_starts_at_zero() {
        let start = t0();
        let mut chapters = vec![twitch(start + Duration::seconds(30), "Late")];
        calculate_chapters(&mut chapters, start, Some(start + Duration::seconds(90)));
        assert_eq!(chapters[0].offset, Some(0.0));
        assert_eq!(chapters[0].duration, Some(90.0));
    }

    #[test]
    fn test_open_ended_last_chapter() {
        let start = t0();
        let mut chapters = vec![twitch(start, "Only")];
        calculate_chapters(&mut chapters, start, None);
        assert_eq!(chapters[0].offset, Some(0.0));
        assert!(chapters[0].duration.is_none());
    }

    #[test]
    fn test_record_keeps_provider_fields() {
        let chapter = Chapter::new(
            t0(),
            "kick stream",
            ChapterDetails::Kick {
                category_id: Some("15".to_string()),
                category_name: Some("Just Chatting".to_string()),
            },
        );
        let json = serde_json::to_string(&chapter.to_record()).unwrap();
        let record: ChapterRecord = serde_json::from_str(&json).unwrap();
        let back = Chapter::from_record(record);
        assert_eq!(back.game_name(), Some("Just Chatting"));
        assert_eq!(back, chapter);
    }

    proptest! {
        #[test]
        fn prop_chapters_tile_timeline(
            mut offsets in proptest::collection::vec(-600i64..20_000, 2..12),
            tail in 0i64..5_000,
        ) {
            let start = t0();
            offsets.sort();
            let end = start + Duration::seconds(offsets[offsets.len() - 1].max(0) + tail);
            let mut chapters: Vec<Chapter> = offsets
                .iter()
                .map(|o| twitch(start + Duration::seconds(*o), "g"))
                .collect();

            calculate_chapters(&mut chapters, start, Some(end));

            prop_assert_eq!(chapters[0].offset, Some(0.0));
            for pair in chapters.windows(2) {
                let a = &pair[0];
                let b = &pair[1];
                let a_end = a.offset.unwrap() + a.duration.unwrap();
                prop_assert!((a_end - b.offset.unwrap()).abs() < 1e-6);
            }
            for c in &chapters {
                prop_assert!(c.offset.unwrap() >= 0.0);
                prop_assert!(c.duration.unwrap() >= 0.0);
            }
        }
    }
}
