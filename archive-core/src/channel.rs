//! 频道聚合

use crate::config::{AppConfig, RetentionConfig};
use crate::keyvalue::KeyValueStore;
use crate::vod::Vod;
use chrono::{DateTime, Utc};
use common::{ApiChannel, Provider, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// 超过此大小的 JSON 不是 VOD 记录
const MAX_VOD_JSON_SIZE: u64 = 1024 * 1024;

/// 派生的 JSON 文件，不是 VOD 记录
const DERIVED_JSON_SUFFIXES: &[&str] = &["_chat.json", "_vod.json", "_chat_mask.json", "_burned.json"];

const GIB: u64 = 1024 * 1024 * 1024;

fn default_quality() -> Vec<String> {
    vec!["best".to_string()]
}

/// 频道录制配置（channels.json 中的一项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub uuid: String,
    pub provider: Provider,
    pub internal_name: String,
    #[serde(default)]
    pub internal_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_quality")]
    pub quality: Vec<String>,
    /// 标题过滤，空表示全部录制
    #[serde(default, rename = "match")]
    pub match_filters: Vec<String>,
    #[serde(default)]
    pub download_chat: bool,
    #[serde(default)]
    pub burn_chat: bool,
    #[serde(default)]
    pub live_chat: bool,
    #[serde(default)]
    pub no_capture: bool,
    #[serde(default)]
    pub no_cleanup: bool,
    /// 字节，0 使用全局默认
    #[serde(default)]
    pub max_storage: u64,
    /// 0 使用全局默认
    #[serde(default)]
    pub max_vods: u32,
    #[serde(default)]
    pub download_vod_at_end: bool,
}

impl ChannelConfig {
    pub fn new(provider: Provider, internal_name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            provider,
            internal_name: internal_name.into(),
            internal_id: String::new(),
            display_name: String::new(),
            quality: default_quality(),
            match_filters: Vec::new(),
            download_chat: false,
            burn_chat: false,
            live_chat: false,
            no_capture: false,
            no_cleanup: false,
            max_storage: 0,
            max_vods: 0,
            download_vod_at_end: false,
        }
    }
}

/// 一次新录制分配到的编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNumbers {
    pub stream_number: u32,
    pub season: String,
    pub absolute_season: u32,
    pub absolute_number: u32,
}

/// 被监控的平台账号
#[derive(Debug, Clone)]
pub struct Channel {
    pub uuid: String,
    pub provider: Provider,
    pub internal_name: String,
    pub internal_id: String,
    pub display_name: String,
    pub quality: Vec<String>,
    pub match_filters: Vec<String>,
    pub download_chat: bool,
    pub burn_chat: bool,
    pub live_chat: bool,
    pub no_capture: bool,
    pub no_cleanup: bool,
    pub max_storage: u64,
    pub max_vods: u32,
    pub download_vod_at_end: bool,

    pub current_stream_number: u32,
    pub current_season: String,
    pub current_absolute_season: u32,
    pub absolute_stream_number: u32,

    /// VOD 数据库：相对 VOD 根目录的记录路径
    pub vods_raw: Vec<String>,
    /// 已加载 VOD 的 UUID，按开始时间排序
    pub vods_list: Vec<String>,
}

impl Channel {
    pub fn from_config(config: ChannelConfig) -> Self {
        let mut channel = Self {
            uuid: config.uuid.clone(),
            provider: config.provider,
            internal_name: String::new(),
            internal_id: String::new(),
            display_name: String::new(),
            quality: Vec::new(),
            match_filters: Vec::new(),
            download_chat: false,
            burn_chat: false,
            live_chat: false,
            no_capture: false,
            no_cleanup: false,
            max_storage: 0,
            max_vods: 0,
            download_vod_at_end: false,
            current_stream_number: 1,
            current_season: String::new(),
            current_absolute_season: 0,
            absolute_stream_number: 0,
            vods_raw: Vec::new(),
            vods_list: Vec::new(),
        };
        channel.apply_config(config);
        channel
    }

    /// 整体替换录制配置，UUID 与平台不变
    pub fn apply_config(&mut self, config: ChannelConfig) {
        self.internal_name = config.internal_name;
        self.internal_id = config.internal_id;
        self.display_name = if config.display_name.is_empty() {
            self.internal_name.clone()
        } else {
            config.display_name
        };
        self.quality = if config.quality.is_empty() {
            default_quality()
        } else {
            config.quality
        };
        self.match_filters = config.match_filters;
        self.download_chat = config.download_chat;
        self.burn_chat = config.burn_chat;
        self.live_chat = config.live_chat;
        self.no_capture = config.no_capture;
        self.no_cleanup = config.no_cleanup;
        self.max_storage = config.max_storage;
        self.max_vods = config.max_vods;
        self.download_vod_at_end = config.download_vod_at_end;
    }

    pub fn to_config(&self) -> ChannelConfig {
        ChannelConfig {
            uuid: self.uuid.clone(),
            provider: self.provider,
            internal_name: self.internal_name.clone(),
            internal_id: self.internal_id.clone(),
            display_name: self.display_name.clone(),
            quality: self.quality.clone(),
            match_filters: self.match_filters.clone(),
            download_chat: self.download_chat,
            burn_chat: self.burn_chat,
            live_chat: self.live_chat,
            no_capture: self.no_capture,
            no_cleanup: self.no_cleanup,
            max_storage: self.max_storage,
            max_vods: self.max_vods,
            download_vod_at_end: self.download_vod_at_end,
        }
    }

    /// 是否可由此标识找到（login、平台 ID 或 UUID）
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.uuid == identifier
            || self.internal_name.eq_ignore_ascii_case(identifier)
            || (!self.internal_id.is_empty() && self.internal_id == identifier)
    }

    pub fn folder(&self, config: &AppConfig) -> PathBuf {
        config.channel_folder(&self.internal_name)
    }

    pub fn live_url(&self) -> String {
        match self.provider {
            Provider::Twitch => format!("https://twitch.tv/{}", self.internal_name),
            Provider::YouTube => format!("https://www.youtube.com/channel/{}/live", self.internal_id),
            Provider::Kick => format!("https://kick.com/{}", self.internal_name),
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.quality.iter().any(|q| q == "audio_only")
    }

    /// 标题是否满足过滤条件
    pub fn matches_title(&self, title: Option<&str>) -> bool {
        if self.match_filters.is_empty() {
            return true;
        }
        let Some(title) = title else {
            return false;
        };
        let title = title.to_lowercase();
        self.match_filters
            .iter()
            .any(|filter| title.contains(&filter.to_lowercase()))
    }

    fn kv_key(&self, name: &str) -> String {
        format!("{}.{}", self.internal_name, name)
    }

    /// 从键值存储恢复计数器
    pub fn setup_stream_number(&mut self, kv: &KeyValueStore, now: DateTime<Utc>, season_format: &str) {
        self.current_stream_number = kv.get_u32(&self.kv_key("stream_number")).unwrap_or(1);
        self.current_season = kv
            .get(&self.kv_key("season_identifier"))
            .map(str::to_string)
            .unwrap_or_else(|| now.format(season_format).to_string());
        self.current_absolute_season = kv
            .get_u32(&self.kv_key("absolute_season_identifier"))
            .unwrap_or(0);
        self.absolute_stream_number = kv
            .get_u32(&self.kv_key("absolute_stream_number"))
            .unwrap_or(0);
    }

    /// 为新录制分配编号
    ///
    /// 季变化时季内编号重置为 1；绝对季随自然月递增；绝对编号只增不减。
    pub fn increment_stream_number(
        &mut self,
        kv: &mut KeyValueStore,
        now: DateTime<Utc>,
        season_format: &str,
    ) -> Result<StreamNumbers> {
        let season = now.format(season_format).to_string();
        let season_key = self.kv_key("season_identifier");
        let number_key = self.kv_key("stream_number");

        let stream_number = if kv.get(&season_key) != Some(season.as_str()) {
            info!("New season {} for {}", season, self.internal_name);
            kv.set(&season_key, &season)?;
            1
        } else {
            kv.get_u32(&number_key).unwrap_or(0) + 1
        };
        kv.set(&number_key, stream_number)?;

        let month = now.format("%Y-%m").to_string();
        let month_key = self.kv_key("absolute_season_month");
        let absolute_season_key = self.kv_key("absolute_season_identifier");
        let mut absolute_season = kv.get_u32(&absolute_season_key).unwrap_or(0);
        if kv.get(&month_key) != Some(month.as_str()) {
            kv.set(&month_key, &month)?;
            absolute_season += 1;
            kv.set(&absolute_season_key, absolute_season)?;
        }

        let absolute_number_key = self.kv_key("absolute_stream_number");
        let absolute_number = kv.get_u32(&absolute_number_key).unwrap_or(0) + 1;
        kv.set(&absolute_number_key, absolute_number)?;

        self.current_stream_number = stream_number;
        self.current_season = season.clone();
        self.current_absolute_season = absolute_season;
        self.absolute_stream_number = absolute_number;

        Ok(StreamNumbers {
            stream_number,
            season,
            absolute_season,
            absolute_number,
        })
    }

    /// 记录路径在 VOD 数据库中的表示
    pub fn vods_db_entry(config: &AppConfig, json_path: &Path) -> String {
        json_path
            .strip_prefix(&config.storage.vod_root)
            .unwrap_or(json_path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn resolve_vods_db_entry(config: &AppConfig, entry: &str) -> PathBuf {
        config.storage.vod_root.join(entry)
    }

    /// 读取 VOD 数据库，文件不存在时返回 None
    pub fn read_vods_db(&mut self, config: &AppConfig) -> Result<Option<Vec<PathBuf>>> {
        let path = config.vods_db_path(&self.internal_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let entries: Vec<String> = serde_json::from_str(&content)?;

        let total = entries.len();
        let mut kept = Vec::with_capacity(total);
        let mut paths = Vec::with_capacity(entries.len());
        for entry in entries {
            let resolved = Self::resolve_vods_db_entry(config, &entry);
            if resolved.exists() {
                kept.push(entry);
                paths.push(resolved);
            } else {
                warn!("VOD {} of {} is gone, dropping it from the database", entry, self.internal_name);
            }
        }

        let dropped = kept.len() != total;
        self.vods_raw = kept;
        if dropped {
            self.save_vods_db(config)?;
        }
        Ok(Some(paths))
    }

    pub fn save_vods_db(&self, config: &AppConfig) -> Result<()> {
        let path = config.vods_db_path(&self.internal_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.vods_raw)?)?;
        debug!("Saved VOD database of {} ({} entries)", self.internal_name, self.vods_raw.len());
        Ok(())
    }

    pub fn add_vods_db_entry(&mut self, config: &AppConfig, json_path: &Path) -> Result<()> {
        let entry = Self::vods_db_entry(config, json_path);
        if !self.vods_raw.contains(&entry) {
            self.vods_raw.push(entry);
            self.save_vods_db(config)?;
        }
        Ok(())
    }

    pub fn remove_vods_db_entry(&mut self, config: &AppConfig, json_path: &Path) -> Result<()> {
        let entry = Self::vods_db_entry(config, json_path);
        let before = self.vods_raw.len();
        self.vods_raw.retain(|e| *e != entry);
        if self.vods_raw.len() != before {
            self.save_vods_db(config)?;
        }
        Ok(())
    }

    /// 扫描频道目录下的 VOD 记录文件
    pub fn rescan_vods(&self, config: &AppConfig) -> Vec<PathBuf> {
        let folder = self.folder(config);
        let shared_folder = folder == config.storage.vod_root;
        let mut found = Vec::new();

        for entry in WalkDir::new(&folder).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".json") || DERIVED_JSON_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > MAX_VOD_JSON_SIZE {
                debug!("Skipping oversized JSON {}", entry.path().display());
                continue;
            }
            if !self.owns_record(entry.path(), shared_folder) {
                continue;
            }
            found.push(entry.path().to_path_buf());
        }
        found.sort();
        info!("Rescanned {}: {} VOD records", self.internal_name, found.len());
        found
    }

    fn owns_record(&self, path: &Path, shared_folder: bool) -> bool {
        let Ok(content) = std::fs::read_to_string(path) else {
            return false;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
            return false;
        };
        if !value.is_object() || (value.get("capture_id").is_none() && value.get("uuid").is_none()) {
            return false;
        }
        match value.get("channel_uuid").and_then(|v| v.as_str()) {
            Some(owner) if !owner.is_empty() => owner == self.uuid,
            _ => !shared_folder,
        }
    }

    /// 比较磁盘、频道列表与注册表中的 VOD，返回是否一致
    pub fn check_stale_vods_in_memory(&self, config: &AppConfig, registry_vods: &[&Vod]) -> bool {
        let on_disk: HashSet<String> = self
            .rescan_vods(config)
            .iter()
            .map(|p| Self::vods_db_entry(config, p))
            .collect();
        let in_db: HashSet<String> = self.vods_raw.iter().cloned().collect();
        let in_registry: HashSet<String> = registry_vods
            .iter()
            .map(|v| Self::vods_db_entry(config, &v.json_path()))
            .collect();

        let mut consistent = true;
        for missing in in_db.difference(&on_disk) {
            error!("{}: VOD {} is listed but its record is gone", self.internal_name, missing);
            consistent = false;
        }
        for missing in in_registry.difference(&in_db) {
            error!("{}: VOD {} is loaded but not in the database", self.internal_name, missing);
            consistent = false;
        }
        if self.vods_list.len() != registry_vods.len() {
            error!(
                "{}: channel lists {} VODs, registry holds {}",
                self.internal_name,
                self.vods_list.len(),
                registry_vods.len()
            );
            consistent = false;
        }
        consistent
    }

    pub fn current_vod<'a>(&self, vods: &[&'a Vod]) -> Option<&'a Vod> {
        vods.iter().copied().find(|v| v.is_capturing)
    }

    pub fn latest_vod<'a>(&self, vods: &[&'a Vod]) -> Option<&'a Vod> {
        vods.iter().copied().max_by_key(|v| v.started_at.or(v.created_at))
    }

    pub fn vods_size(&self, vods: &[&Vod]) -> u64 {
        vods.iter().map(|v| v.total_size).sum()
    }

    /// 按保留策略挑出可删除的 VOD（由旧到新）
    pub fn cleanup_candidates(
        &self,
        vods: &[&Vod],
        retention: &RetentionConfig,
        ignore_uuid: Option<&str>,
    ) -> Vec<String> {
        if self.no_cleanup {
            return Vec::new();
        }
        let max_storage = if self.max_storage > 0 {
            self.max_storage
        } else {
            retention.storage_per_streamer_gb.saturating_mul(GIB)
        };
        let max_vods = if self.max_vods > 0 {
            self.max_vods
        } else {
            retention.vods_to_keep
        } as usize;

        let mut finalized: Vec<&Vod> = vods.iter().copied().filter(|v| v.is_finalized).collect();
        finalized.sort_by_key(|v| std::cmp::Reverse(v.started_at.or(v.created_at)));

        let mut total_size = 0u64;
        let mut count = 0usize;
        let mut candidates = Vec::new();
        for vod in finalized {
            if vod.prevent_deletion || ignore_uuid == Some(vod.uuid.as_str()) {
                continue;
            }
            if total_size > max_storage || count >= max_vods {
                candidates.push(vod.uuid.clone());
            }
            total_size += vod.total_size;
            count += 1;
        }
        candidates.reverse();
        candidates
    }

    pub fn to_api(&self, vods: &[&Vod]) -> ApiChannel {
        let current = self.current_vod(vods);
        ApiChannel {
            uuid: self.uuid.clone(),
            provider: self.provider,
            internal_name: self.internal_name.clone(),
            internal_id: self.internal_id.clone(),
            display_name: self.display_name.clone(),
            quality: self.quality.clone(),
            is_live: current.is_some(),
            current_vod: current.map(|v| v.uuid.clone()),
            latest_vod: self.latest_vod(vods).map(|v| v.uuid.clone()),
            vods_size: self.vods_size(vods),
            vod_count: vods.len(),
            current_stream_number: self.current_stream_number,
            current_season: self.current_season.clone(),
        }
    }
}
