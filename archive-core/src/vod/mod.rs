//! 录像（VOD）实体
//!
//! 一个 VOD 对应 `<directory>/<basename>.json` 记录及其全部关联文件。
//! 所有改动磁盘的操作都在监视暂停期间进行，保存后重新登记监视路径并调度广播。

pub mod chapter;
pub mod exports;
mod lifecycle;
pub mod provider;
pub mod record;
pub mod segment;

pub use chapter::{calculate_chapters, Chapter, ChapterDetails};
pub use lifecycle::remux_args;
pub use provider::{ProviderCapabilities, ProviderVod};
pub use record::{VodRecord, RECORD_VERSION};
pub use segment::Segment;

use crate::config::AppConfig;
use crate::context::VodContext;
use crate::reconcile::FixIssue;
use chrono::{DateTime, Utc};
use common::{
    ApiVod, ArchiveError, Bookmark, MediaInfo, Provider, Result, StreamPause, ViewerSample,
    EVENT_VOD_UPDATED,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 关联文件后缀（相对 basename）
pub const ASSOCIATED_SUFFIXES: &[&str] = &[
    ".json",
    ".ts",
    ".chat",
    "_chat.json",
    "_vod.mp4",
    "-llc-edl.csv",
    "_chat.mp4",
    "_chat_mask.mp4",
    "_burned.mp4",
    ".chatdump",
    ".chatdump.txt",
    ".chatdump.line",
    ".m3u8",
    ".adbreak",
    "-ffmpeg-chapters.txt",
    ".chapters.vtt",
    ".nfo",
    "-contact_sheet.png",
];

/// 一次录制
#[derive(Debug, Clone)]
pub struct Vod {
    pub uuid: String,
    pub capture_id: String,
    pub channel_uuid: String,
    pub basename: String,
    pub directory: PathBuf,
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

    /// 持久化的分段文件名
    pub segments_raw: Vec<String>,
    /// 由 segments_raw 推导，带文件状态
    pub segments: Vec<Segment>,
    pub segments_metadata: BTreeMap<String, MediaInfo>,
    pub video_metadata: Option<MediaInfo>,
    pub chapters: Vec<Chapter>,
    pub total_size: u64,

    pub stream_number: Option<u32>,
    pub stream_season: Option<String>,
    pub stream_absolute_season: Option<u32>,
    pub stream_absolute_number: Option<u32>,

    pub comment: Option<String>,
    pub export_data: serde_json::Map<String, serde_json::Value>,
    pub viewers: Vec<ViewerSample>,
    pub stream_pauses: Vec<StreamPause>,
    pub bookmarks: Vec<Bookmark>,

    /// 本次内存生命周期内已尝试过的修复
    pub(crate) tried_fixes: HashSet<FixIssue>,
}

fn file_name_of(raw: &str) -> &str {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(raw)
}

/// 跨文件系统时退化为复制后删除
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

impl Vod {
    pub fn new(
        uuid: impl Into<String>,
        channel_uuid: impl Into<String>,
        capture_id: impl Into<String>,
        basename: impl Into<String>,
        directory: impl Into<PathBuf>,
        provider: Provider,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            capture_id: capture_id.into(),
            channel_uuid: channel_uuid.into(),
            basename: basename.into(),
            directory: directory.into(),
            external: ProviderVod::for_provider(provider),
            stream_title: None,
            stream_resolution: None,
            created: false,
            not_started: false,
            is_capturing: false,
            is_converting: false,
            is_finalized: false,
            failed: false,
            prevent_deletion: false,
            cloud_storage: false,
            created_at: None,
            started_at: None,
            ended_at: None,
            capture_started: None,
            capture_started2: None,
            conversion_started: None,
            saved_at: None,
            segments_raw: Vec::new(),
            segments: Vec::new(),
            segments_metadata: BTreeMap::new(),
            video_metadata: None,
            chapters: Vec::new(),
            total_size: 0,
            stream_number: None,
            stream_season: None,
            stream_absolute_season: None,
            stream_absolute_number: None,
            comment: None,
            export_data: serde_json::Map::new(),
            viewers: Vec::new(),
            stream_pauses: Vec::new(),
            bookmarks: Vec::new(),
            tried_fixes: HashSet::new(),
        }
    }

    /// 由记录构造，basename 取文件名主干，目录取所在目录
    pub fn from_record(record: VodRecord, json_path: &Path) -> Result<Self> {
        let basename = json_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ArchiveError::InvalidBasename(json_path.display().to_string()))?
            .to_string();
        let directory = json_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut vod = Self::new(
            record.uuid,
            record.channel_uuid,
            record.capture_id,
            basename,
            directory,
            record.external.provider(),
        );
        vod.external = record.external;
        vod.stream_title = record.stream_title;
        vod.stream_resolution = record.stream_resolution;
        vod.created = record.created;
        vod.not_started = record.not_started;
        vod.is_capturing = record.is_capturing;
        vod.is_converting = record.is_converting;
        vod.is_finalized = record.is_finalized;
        vod.failed = record.failed;
        vod.prevent_deletion = record.prevent_deletion;
        vod.cloud_storage = record.cloud_storage;
        vod.created_at = record.created_at;
        vod.started_at = record.started_at;
        vod.ended_at = record.ended_at;
        vod.capture_started = record.capture_started;
        vod.capture_started2 = record.capture_started2;
        vod.conversion_started = record.conversion_started;
        vod.saved_at = record.saved_at;
        vod.segments_raw = record.segments;
        vod.segments_metadata = record.segments_metadata;
        vod.video_metadata = record.video_metadata;
        vod.chapters = record.chapters.into_iter().map(Chapter::from_record).collect();
        vod.stream_number = record.stream_number;
        vod.stream_season = record.stream_season;
        vod.stream_absolute_season = record.stream_absolute_season;
        vod.stream_absolute_number = record.stream_absolute_number;
        vod.comment = record.comment;
        vod.export_data = record.export_data;
        vod.viewers = record.viewers;
        vod.stream_pauses = record.stream_pauses;
        vod.bookmarks = record.bookmarks;
        Ok(vod)
    }

    pub fn to_record(&self) -> VodRecord {
        VodRecord {
            version: RECORD_VERSION,
            uuid: self.uuid.clone(),
            capture_id: self.capture_id.clone(),
            channel_uuid: self.channel_uuid.clone(),
            external: self.external.clone(),
            stream_title: self.stream_title.clone(),
            stream_resolution: self.stream_resolution.clone(),
            created: self.created,
            not_started: self.not_started,
            is_capturing: self.is_capturing,
            is_converting: self.is_converting,
            is_finalized: self.is_finalized,
            failed: self.failed,
            prevent_deletion: self.prevent_deletion,
            cloud_storage: self.cloud_storage,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            capture_started: self.capture_started,
            capture_started2: self.capture_started2,
            conversion_started: self.conversion_started,
            saved_at: self.saved_at,
            segments: self.segments_raw.clone(),
            segments_metadata: self.segments_metadata.clone(),
            video_metadata: self.video_metadata.clone(),
            duration: self.duration(),
            chapters: self.chapters.iter().map(Chapter::to_record).collect(),
            stream_number: self.stream_number,
            stream_season: self.stream_season.clone(),
            stream_absolute_season: self.stream_absolute_season,
            stream_absolute_number: self.stream_absolute_number,
            comment: self.comment.clone(),
            export_data: self.export_data.clone(),
            viewers: self.viewers.clone(),
            stream_pauses: self.stream_pauses.clone(),
            bookmarks: self.bookmarks.clone(),
        }
    }

    /// 从磁盘读取记录并解析分段
    pub async fn load(json_path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(json_path).await?;
        let record: VodRecord = serde_json::from_str(&content)?;
        let mut vod = Self::from_record(record, json_path)?;
        if let Err(e) = vod.parse_segments() {
            warn!("Loaded {} with unusable segments: {}", vod.basename, e);
        }
        debug!("Loaded VOD {} ({})", vod.basename, vod.uuid);
        Ok(vod)
    }

    pub fn provider(&self) -> Provider {
        self.external.provider()
    }

    pub fn json_path(&self) -> PathBuf {
        self.path_with_suffix(".json")
    }

    pub fn path_with_suffix(&self, suffix: &str) -> PathBuf {
        self.directory.join(format!("{}{}", self.basename, suffix))
    }

    /// 采集得到的原始 .ts 文件
    pub fn raw_capture_path(&self) -> PathBuf {
        self.path_with_suffix(".ts")
    }

    /// 旧版固定 mp4 输出
    pub fn legacy_output_path(&self) -> PathBuf {
        self.path_with_suffix(".mp4")
    }

    /// 由 segments_raw 重新推导分段，非法文件名的条目被跳过并报错
    pub fn parse_segments(&mut self) -> Result<()> {
        let mut rejected = None;
        let mut segments = Vec::with_capacity(self.segments_raw.len());

        for raw in &self.segments_raw {
            if segment::has_illegal_chars(file_name_of(raw)) {
                warn!("Segment '{}' of {} has an illegal file name", raw, self.basename);
                rejected.get_or_insert_with(|| raw.clone());
                continue;
            }
            let mut parsed = Segment::from_disk(&self.directory, raw);
            parsed.media = self.segments_metadata.get(&parsed.basename).cloned();
            segments.push(parsed);
        }

        self.total_size = segments
            .iter()
            .filter(|s| !s.deleted)
            .map(|s| s.filesize)
            .sum();
        self.segments = segments;

        match rejected {
            Some(raw) => Err(ArchiveError::InvalidBasename(raw)),
            None => Ok(()),
        }
    }

    /// 追加分段并整体重建派生列表
    pub fn add_segment(&mut self, raw: &str) -> Result<()> {
        let name = file_name_of(raw).to_string();
        debug!("Adding segment {} to {}", name, self.basename);
        if !self.segments_raw.contains(&name) {
            self.segments_raw.push(name);
        }
        self.parse_segments()
    }

    /// 监视路径：记录文件与全部分段
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.json_path()];
        paths.extend(self.segments.iter().map(|s| s.filename.clone()));
        paths
    }

    /// 写入记录文件
    pub async fn save_json(&mut self, ctx: &VodContext<'_>, reason: &str) -> Result<()> {
        let pause = ctx.services.watcher.pause(&self.uuid);

        tokio::fs::create_dir_all(&self.directory).await?;
        self.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.to_record())?;
        tokio::fs::write(self.json_path(), json).await?;
        debug!("Saved {} ({})", self.basename, reason);

        ctx.services.watcher.watch(&self.uuid, self.watch_paths());
        drop(pause);

        self.broadcast_update(ctx);
        Ok(())
    }

    pub fn broadcast_update(&self, ctx: &VodContext<'_>) {
        let payload = serde_json::to_value(self.to_api(ctx.config)).unwrap_or_default();
        ctx.services
            .broadcaster
            .schedule(&self.uuid, EVENT_VOD_UPDATED, payload);
    }

    /// 根据磁盘内容重建分段列表
    ///
    /// `include_misnamed_files` 且 VOD 独占目录时收录目录内全部媒体文件，
    /// 否则只收录以 basename 开头的文件。派生文件总是排除。
    pub async fn rebuild_segment_list(
        &mut self,
        ctx: &VodContext<'_>,
        include_misnamed_files: bool,
    ) -> Result<()> {
        let own_directory = include_misnamed_files
            && ctx
                .channel
                .map(|c| ctx.config.channel_folder(&c.internal_name) != self.directory)
                .unwrap_or(false);

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !ctx.config.is_media_file(&name) || segment::is_derived_artifact(&name) {
                continue;
            }
            if !own_directory && !name.starts_with(&self.basename) {
                continue;
            }
            found.push(name);
        }
        found.sort();

        if found.is_empty() {
            return Err(ArchiveError::NoSegmentCandidates(self.basename.clone()));
        }

        info!("Rebuilt segment list of {}: {:?}", self.basename, found);
        self.segments_raw = found;
        if let Err(e) = self.parse_segments() {
            warn!("Rebuilt segments of {} still invalid: {}", self.basename, e);
        }
        self.save_json(ctx, "segments rebuilt").await
    }

    /// 删除分段文件，`keep_entry` 时保留条目并标记为云端存储
    pub async fn delete_segment(
        &mut self,
        ctx: &VodContext<'_>,
        index: usize,
        keep_entry: bool,
    ) -> Result<()> {
        let segment = self.segments.get(index).ok_or_else(|| {
            ArchiveError::InvalidParameter(format!(
                "Segment index {} out of range for {}",
                index, self.basename
            ))
        })?;
        let filename = segment.filename.clone();
        let basename = segment.basename.clone();

        {
            let _pause = ctx.services.watcher.pause(&self.uuid);
            if filename.exists() {
                tokio::fs::remove_file(&filename).await?;
            }
        }

        if keep_entry {
            self.cloud_storage = true;
        } else {
            self.segments_raw.retain(|raw| file_name_of(raw) != basename);
            self.segments_metadata.remove(&basename);
        }
        if let Err(e) = self.parse_segments() {
            warn!("Segments of {} invalid after delete: {}", self.basename, e);
        }
        info!("Deleted segment {} of {} (keep entry: {})", basename, self.basename, keep_entry);
        self.save_json(ctx, "segment deleted").await
    }

    /// 磁盘上存在的全部关联文件
    pub fn associated_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        ASSOCIATED_SUFFIXES
            .iter()
            .map(|suffix| self.path_with_suffix(suffix))
            .chain(self.segments.iter().map(|s| s.filename.clone()))
            .chain(self.segments_raw.iter().map(|raw| self.directory.join(file_name_of(raw))))
            .filter(|path| path.exists())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    /// 以新 basename 重命名全部关联文件与记录
    pub async fn change_base_name(&mut self, ctx: &VodContext<'_>, new_basename: &str) -> Result<()> {
        if new_basename == self.basename {
            return Ok(());
        }
        if new_basename.is_empty() || segment::has_illegal_chars(new_basename) {
            return Err(ArchiveError::InvalidBasename(new_basename.to_string()));
        }

        let old = self.basename.clone();
        let renamed = |name: &str| -> Option<String> {
            name.strip_prefix(old.as_str())
                .map(|rest| format!("{}{}", new_basename, rest))
        };

        let mut moves = Vec::new();
        for path in self.associated_files() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(new_name) = renamed(name) else {
                warn!("{} does not start with {}, left in place", name, old);
                continue;
            };
            let target = path.with_file_name(new_name);
            if target.exists() {
                return Err(ArchiveError::InvalidParameter(format!(
                    "Rename target already exists: {}",
                    target.display()
                )));
            }
            moves.push((path, target));
        }

        {
            let _pause = ctx.services.watcher.pause(&self.uuid);
            for (from, to) in &moves {
                tokio::fs::rename(from, to).await?;
            }
        }

        self.segments_raw = self
            .segments_raw
            .iter()
            .map(|raw| renamed(file_name_of(raw)).unwrap_or_else(|| raw.clone()))
            .collect();
        self.segments_metadata = std::mem::take(&mut self.segments_metadata)
            .into_iter()
            .map(|(name, media)| (renamed(&name).unwrap_or(name), media))
            .collect();
        self.basename = new_basename.to_string();
        info!("Renamed {} to {}", old, new_basename);

        let old_json = self.directory.join(format!("{}.json", old));
        if old_json.exists() {
            tokio::fs::remove_file(&old_json).await?;
        }

        let parsed = self.parse_segments();
        let missing = self.segments.iter().any(|s| s.deleted);
        if (parsed.is_err() || missing) && !self.cloud_storage {
            match self.rebuild_segment_list(ctx, false).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Could not rebuild segments of {} after rename: {}", self.basename, e),
            }
        }
        self.save_json(ctx, "renamed").await
    }

    /// 移动全部关联文件到新目录
    pub async fn move_to(&mut self, ctx: &VodContext<'_>, destination: &Path) -> Result<()> {
        tokio::fs::create_dir_all(destination).await?;

        let files = self.associated_files();
        for path in &files {
            if let Some(name) = path.file_name() {
                if destination.join(name).exists() {
                    return Err(ArchiveError::InvalidParameter(format!(
                        "{} already exists in {}",
                        name.to_string_lossy(),
                        destination.display()
                    )));
                }
            }
        }

        {
            let _pause = ctx.services.watcher.pause(&self.uuid);
            for path in &files {
                if let Some(name) = path.file_name() {
                    move_file(path, &destination.join(name)).await?;
                }
            }
        }

        info!("Moved {} from {} to {}", self.basename, self.directory.display(), destination.display());
        self.directory = destination.to_path_buf();
        if let Err(e) = self.parse_segments() {
            warn!("Segments of {} invalid after move: {}", self.basename, e);
        }
        self.save_json(ctx, "moved").await
    }

    /// 删除全部关联文件并停止监视
    pub async fn delete_files(&mut self, ctx: &VodContext<'_>) -> Result<()> {
        if self.prevent_deletion {
            return Err(ArchiveError::DeletionPrevented(self.uuid.clone()));
        }

        let files = self.associated_files();
        let mut first_error = None;
        {
            let _pause = ctx.services.watcher.pause(&self.uuid);
            for path in &files {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    first_error.get_or_insert(e);
                }
            }
            if ctx.config.storage.vod_folders {
                // 只删除空目录
                let _ = tokio::fs::remove_dir(&self.directory).await;
            }
        }
        ctx.services.watcher.unwatch(&self.uuid);
        ctx.services.broadcaster.cancel(&self.uuid);

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!("Deleted {} files of {}", files.len(), self.basename);
                Ok(())
            }
        }
    }

    /// 第一个分段的时长，没有分段元数据时退回旧版整段元数据
    pub fn duration(&self) -> Option<f64> {
        if self.segments_raw.is_empty() {
            return None;
        }
        self.segments
            .first()
            .and_then(Segment::duration)
            .or_else(|| self.video_metadata.as_ref().map(|m| m.duration))
    }

    /// 采集中使用的实时时长
    pub fn duration_live(&self, now: DateTime<Utc>) -> Option<f64> {
        self.started_at
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn is_converted(&self) -> bool {
        !self.segments.is_empty()
            && !self.is_converting
            && self.segments.iter().any(|s| !s.deleted && s.filesize > 0)
    }

    /// 开始时间所在的季
    pub fn season_of_start(&self, season_format: &str) -> Option<String> {
        self.started_at.map(|t| t.format(season_format).to_string())
    }

    pub fn add_viewer_sample(&mut self, timestamp: DateTime<Utc>, amount: u64) {
        self.viewers.push(ViewerSample { timestamp, amount });
    }

    pub fn add_stream_pause(&mut self, start: DateTime<Utc>) {
        self.stream_pauses.push(StreamPause { start: Some(start), end: None });
    }

    /// 结束最近一个未结束的暂停
    pub fn end_stream_pause(&mut self, end: DateTime<Utc>) -> bool {
        match self.stream_pauses.iter_mut().rev().find(|p| p.end.is_none()) {
            Some(pause) => {
                pause.end = Some(end);
                true
            }
            None => false,
        }
    }

    pub fn to_api(&self, config: &AppConfig) -> ApiVod {
        ApiVod {
            uuid: self.uuid.clone(),
            channel_uuid: self.channel_uuid.clone(),
            capture_id: self.capture_id.clone(),
            provider: self.provider(),
            basename: self.basename.clone(),
            directory: self.directory.display().to_string(),
            is_capturing: self.is_capturing,
            is_converting: self.is_converting,
            is_finalized: self.is_finalized,
            failed: self.failed,
            not_started: self.not_started,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            saved_at: self.saved_at,
            duration: self.duration(),
            total_size: self.total_size,
            stream_number: self.stream_number,
            stream_season: self
                .stream_season
                .clone()
                .or_else(|| self.season_of_start(&config.naming.season_format)),
            stream_absolute_season: self.stream_absolute_season,
            comment: self.comment.clone(),
            prevent_deletion: self.prevent_deletion,
            cloud_storage: self.cloud_storage,
            segments: self.segments.iter().map(Segment::to_api).collect(),
            chapters: self.chapters.iter().map(Chapter::to_api).collect(),
            external: self.external.to_value(),
        }
    }
}
