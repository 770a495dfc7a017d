//! 归档上下文：持有注册表、配置与外部服务，所有跨实体操作从这里进入

use crate::channel::{Channel, ChannelConfig, StreamNumbers};
use crate::config::AppConfig;
use crate::context::{Services, VodContext};
use crate::keyvalue::KeyValueStore;
use crate::reconcile::reconcile_vod;
use crate::registry::Registry;
use crate::vod::segment::sanitize_filename;
use crate::vod::{Chapter, ChapterDetails, Vod};
use crate::watcher::{WatchEvent, WatchEventKind};
use chrono::{DateTime, Utc};
use common::{
    ApiChannel, ApiVod, ArchiveError, BatchReport, Provider, Result, StreamEvent, StreamEventType,
    EVENT_CHANNEL_UPDATED, EVENT_VOD_REMOVED,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 按模板生成 basename，非法字符替换为下划线
pub fn render_basename(
    template: &str,
    login: &str,
    date: &str,
    capture_id: &str,
    numbers: &StreamNumbers,
) -> String {
    let rendered = template
        .replace("{login}", login)
        .replace("{date}", date)
        .replace("{id}", capture_id)
        .replace("{season}", &numbers.season)
        .replace("{episode}", &numbers.stream_number.to_string())
        .replace("{absolute_season}", &numbers.absolute_season.to_string())
        .replace("{absolute_episode}", &numbers.absolute_number.to_string());
    sanitize_filename(&rendered).replace(['/', '\\'], "_")
}

/// 直播事件中的分类信息转为章节
fn stream_event_chapter(provider: Provider, event: &StreamEvent) -> Option<Chapter> {
    if event.title.is_none() && event.category_name.is_none() {
        return None;
    }
    let details = match provider {
        Provider::Twitch => ChapterDetails::Twitch {
            game_id: event.category_id.clone(),
            game_name: event.category_name.clone(),
            box_art_url: None,
            viewer_count: None,
            is_mature: false,
        },
        Provider::YouTube => ChapterDetails::YouTube,
        Provider::Kick => ChapterDetails::Kick {
            category_id: event.category_id.clone(),
            category_name: event.category_name.clone(),
        },
    };
    Some(Chapter::new(
        event.timestamp,
        event.title.clone().unwrap_or_default(),
        details,
    ))
}

pub struct Archive {
    pub config: Arc<AppConfig>,
    pub registry: Registry,
    pub keyvalue: KeyValueStore,
    pub services: Services,
}

impl Archive {
    pub fn new(config: Arc<AppConfig>, services: Services, keyvalue: KeyValueStore) -> Self {
        Self {
            config,
            registry: Registry::new(),
            keyvalue,
            services,
        }
    }

    /// 借出 VOD 及其操作上下文
    pub(crate) fn vod_with_context(&mut self, vod_uuid: &str) -> Result<(&mut Vod, VodContext<'_>)> {
        let (vod, channel) = self.registry.vod_and_channel(vod_uuid)?;
        Ok((vod, VodContext::new(&self.config, &self.services, channel)))
    }

    fn channel_exists(&self, channel_uuid: &str) -> Result<()> {
        match self.registry.channel(channel_uuid) {
            Some(_) => Ok(()),
            None => Err(ArchiveError::ChannelNotFound(channel_uuid.to_string())),
        }
    }

    pub fn vod_api(&self, vod_uuid: &str) -> Option<ApiVod> {
        self.registry.vod(vod_uuid).map(|v| v.to_api(&self.config))
    }

    pub fn channel_api(&self, channel_uuid: &str) -> Option<ApiChannel> {
        let channel = self.registry.channel(channel_uuid)?;
        Some(channel.to_api(&self.registry.vods_by_channel(channel_uuid)))
    }

    pub fn broadcast_channel(&self, channel_uuid: &str) {
        if let Some(api) = self.channel_api(channel_uuid) {
            let payload = serde_json::to_value(api).unwrap_or_default();
            self.services
                .broadcaster
                .schedule(channel_uuid, EVENT_CHANNEL_UPDATED, payload);
        }
    }

    fn current_vod_uuid(&self, channel_uuid: &str) -> Option<String> {
        self.registry
            .vods_by_channel(channel_uuid)
            .into_iter()
            .find(|v| v.is_capturing)
            .map(|v| v.uuid.clone())
    }

    /// 写入频道配置列表
    pub async fn persist_channels(&self) -> Result<()> {
        let configs: Vec<ChannelConfig> = self.registry.channels().map(Channel::to_config).collect();
        let path = self.config.channels_config_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string_pretty(&configs)?).await?;
        debug!("Saved {} channel configs", configs.len());
        Ok(())
    }

    /// 启动时加载全部频道及其 VOD
    pub async fn load_channels(&mut self) -> Result<usize> {
        let path = self.config.channels_config_path();
        if !path.exists() {
            info!("No channel configuration at {}", path.display());
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let configs: Vec<ChannelConfig> = serde_json::from_str(&content)?;

        let mut assigned_uuid = false;
        let mut loaded = 0;
        for mut config in configs {
            if config.uuid.is_empty() {
                config.uuid = Uuid::new_v4().to_string();
                assigned_uuid = true;
            }
            let uuid = config.uuid.clone();
            let mut channel = Channel::from_config(config);
            channel.setup_stream_number(&self.keyvalue, Utc::now(), &self.config.naming.season_format);
            let name = channel.internal_name.clone();

            if let Err(e) = self.registry.add_channel(channel) {
                error!("Could not register channel {}: {}", name, e);
                continue;
            }
            match self.parse_vods(&uuid).await {
                Ok(count) => info!("📺 Loaded channel {} with {} VODs", name, count),
                Err(e) => error!("Could not load VODs of {}: {}", name, e),
            }
            loaded += 1;
        }

        if assigned_uuid {
            self.persist_channels().await?;
        }
        Ok(loaded)
    }

    /// 读取频道的 VOD 数据库（缺失时重新扫描），加载并对账每个 VOD
    pub async fn parse_vods(&mut self, channel_uuid: &str) -> Result<usize> {
        let config = self.config.clone();
        let paths = {
            let channel = self
                .registry
                .channel_mut(channel_uuid)
                .ok_or_else(|| ArchiveError::ChannelNotFound(channel_uuid.to_string()))?;
            match channel.read_vods_db(&config)? {
                Some(paths) => paths,
                None => {
                    warn!("No VOD database for {}, rescanning", channel.internal_name);
                    let found = channel.rescan_vods(&config);
                    channel.vods_raw = found
                        .iter()
                        .map(|p| Channel::vods_db_entry(&config, p))
                        .collect();
                    channel.save_vods_db(&config)?;
                    found
                }
            }
        };

        let mut loaded = 0;
        for path in paths {
            let mut vod = match Vod::load(&path).await {
                Ok(vod) => vod,
                Err(e) => {
                    error!("Could not load VOD {}: {}", path.display(), e);
                    continue;
                }
            };
            if vod.channel_uuid.is_empty() {
                vod.channel_uuid = channel_uuid.to_string();
            } else if vod.channel_uuid != channel_uuid {
                warn!(
                    "{} is listed under {} but belongs to {}, skipped",
                    vod.basename, channel_uuid, vod.channel_uuid
                );
                continue;
            }

            let old_json = vod.json_path();
            {
                let ctx = VodContext::new(&self.config, &self.services, self.registry.channel(channel_uuid));
                reconcile_vod(&mut vod, &ctx, "load").await;
                self.services.watcher.watch(&vod.uuid, vod.watch_paths());
            }
            if let Err(e) = self.sync_vods_db_entry(channel_uuid, &old_json, &vod.json_path()) {
                warn!("VOD database of {} not updated: {}", channel_uuid, e);
            }

            let basename = vod.basename.clone();
            match self.registry.add_vod(vod) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("VOD {} not registered: {}", basename, e),
            }
        }
        Ok(loaded)
    }

    /// 校验并添加频道
    pub async fn add_channel(&mut self, config: ChannelConfig) -> Result<String> {
        let identity = self
            .services
            .gateway
            .resolve_channel(config.provider, &config.internal_name)
            .await?;
        if self.registry.find_channel(&identity.internal_name).is_some() {
            return Err(ArchiveError::InvalidParameter(format!(
                "Channel {} already exists",
                identity.internal_name
            )));
        }

        let mut config = config;
        config.uuid = Uuid::new_v4().to_string();
        config.internal_name = identity.internal_name;
        config.internal_id = identity.internal_id;
        if config.display_name.is_empty() {
            config.display_name = identity.display_name;
        }
        let uuid = config.uuid.clone();

        let mut channel = Channel::from_config(config);
        channel.setup_stream_number(&self.keyvalue, Utc::now(), &self.config.naming.season_format);
        let name = channel.internal_name.clone();
        self.registry.add_channel(channel)?;
        self.persist_channels().await?;

        if let Err(e) = self.parse_vods(&uuid).await {
            warn!("Could not parse VODs of new channel {}: {}", name, e);
        }
        info!("📺 Added channel {} ({})", name, uuid);
        self.broadcast_channel(&uuid);
        Ok(uuid)
    }

    /// 替换频道配置并持久化
    pub async fn apply_channel_config(&mut self, channel_uuid: &str, config: ChannelConfig) -> Result<()> {
        let channel = self
            .registry
            .channel_mut(channel_uuid)
            .ok_or_else(|| ArchiveError::ChannelNotFound(channel_uuid.to_string()))?;
        channel.apply_config(config);
        info!("Updated configuration of {}", channel.internal_name);
        self.persist_channels().await?;
        self.broadcast_channel(channel_uuid);
        Ok(())
    }

    /// 删除频道：退订推送，删除（或仅卸载）全部 VOD，持久化配置
    pub async fn delete_channel(&mut self, channel_uuid: &str, delete_files: bool) -> Result<BatchReport> {
        let (provider, internal_id, folder) = {
            let channel = self
                .registry
                .channel(channel_uuid)
                .ok_or_else(|| ArchiveError::ChannelNotFound(channel_uuid.to_string()))?;
            (channel.provider, channel.internal_id.clone(), channel.folder(&self.config))
        };
        if delete_files && folder == self.config.storage.vod_root {
            return Err(ArchiveError::RootFolderDeletion(folder.display().to_string()));
        }

        if let Err(e) = self.services.gateway.unsubscribe(provider, &internal_id).await {
            warn!("Unsubscribe of {} failed: {}", internal_id, e);
        }

        let mut report = BatchReport::default();
        if delete_files {
            let uuids: Vec<String> = self
                .registry
                .vods_by_channel(channel_uuid)
                .iter()
                .map(|v| v.uuid.clone())
                .collect();
            for uuid in uuids {
                match self.delete_vod(&uuid).await {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => {
                        warn!("Could not delete VOD {}: {}", uuid, e);
                        report.failed += 1;
                    }
                }
            }
        }
        for vod in self.registry.clear_vods(channel_uuid) {
            self.services.watcher.unwatch(&vod.uuid);
            self.services.broadcaster.cancel(&vod.uuid);
            if !delete_files {
                report.succeeded += 1;
            }
        }

        if let Some(channel) = self.registry.remove_channel(channel_uuid) {
            if delete_files {
                let db = self.config.vods_db_path(&channel.internal_name);
                if db.exists() {
                    tokio::fs::remove_file(&db).await?;
                }
                // 只删除空目录
                let _ = tokio::fs::remove_dir(&folder).await;
            }
            info!("🗑️ Deleted channel {} ({})", channel.internal_name, report);
        }
        self.services.broadcaster.cancel(channel_uuid);
        self.persist_channels().await?;
        Ok(report)
    }

    /// 写入初始记录并登记，尚未开始采集
    pub async fn create_vod(
        &mut self,
        channel_uuid: &str,
        capture_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String> {
        if self.registry.vod_by_capture_id(channel_uuid, capture_id).is_some() {
            return Err(ArchiveError::DuplicateVod(format!("capture {}", capture_id)));
        }
        let config = self.config.clone();

        let channel = self
            .registry
            .channel_mut(channel_uuid)
            .ok_or_else(|| ArchiveError::ChannelNotFound(channel_uuid.to_string()))?;
        let numbers =
            channel.increment_stream_number(&mut self.keyvalue, started_at, &config.naming.season_format)?;
        let date = started_at.format(&config.naming.date_format).to_string();
        let basename = render_basename(
            &config.naming.vod_basename,
            &channel.internal_name,
            &date,
            capture_id,
            &numbers,
        );
        let mut directory = channel.folder(&config);
        if config.storage.vod_folders {
            directory = directory.join(&basename);
        }

        let mut vod = Vod::new(
            Uuid::new_v4().to_string(),
            channel_uuid,
            capture_id,
            basename,
            directory,
            channel.provider,
        );
        vod.created = true;
        vod.not_started = true;
        vod.created_at = Some(Utc::now());
        vod.started_at = Some(started_at);
        vod.stream_number = Some(numbers.stream_number);
        vod.stream_season = Some(numbers.season);
        vod.stream_absolute_season = Some(numbers.absolute_season);
        vod.stream_absolute_number = Some(numbers.absolute_number);

        {
            let ctx = VodContext::new(&self.config, &self.services, self.registry.channel(channel_uuid));
            vod.save_json(&ctx, "created").await?;
        }
        if let Some(channel) = self.registry.channel_mut(channel_uuid) {
            channel.add_vods_db_entry(&config, &vod.json_path())?;
        }

        let uuid = vod.uuid.clone();
        info!("Created VOD {} ({})", vod.basename, uuid);
        self.registry.add_vod(vod)?;
        self.broadcast_channel(channel_uuid);
        Ok(uuid)
    }

    pub async fn begin_capture(&mut self, vod_uuid: &str) -> Result<()> {
        let channel_uuid = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            vod.begin_capture(&ctx, Utc::now()).await?;
            vod.channel_uuid.clone()
        };
        self.broadcast_channel(&channel_uuid);
        Ok(())
    }

    /// 采集进程退出
    pub async fn handle_capture_exited(&mut self, vod_uuid: &str, success: bool) -> Result<()> {
        let (channel_uuid, converted) = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            if !vod.is_capturing {
                debug!("Capture exit of {} ignored, not capturing", vod.basename);
                return Ok(());
            }
            if !success {
                warn!("Capture of {} exited with an error", vod.basename);
            }
            let converted = match vod.end_capture(&ctx, Utc::now()).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not convert {}: {}", vod.basename, e);
                    false
                }
            };
            let min_chapter = ctx.config.retention.min_chapter_duration;
            if min_chapter > 0.0 {
                if let Err(e) = vod.remove_short_chapters(&ctx, min_chapter).await {
                    warn!("Short chapters of {} kept: {}", vod.basename, e);
                }
            }
            (vod.channel_uuid.clone(), converted)
        };
        if !converted {
            self.reconcile(vod_uuid, "capture exit").await?;
        }
        self.broadcast_channel(&channel_uuid);
        Ok(())
    }

    /// 转封装结束：成功则追加分段并定型
    pub async fn handle_remux_finished(&mut self, vod_uuid: &str, output: &Path, success: bool) -> Result<()> {
        let channel_uuid = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            vod.is_converting = false;

            if success && output.exists() {
                let name = output
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                if let Err(e) = vod.add_segment(&name) {
                    warn!("Segment list of {} invalid: {}", vod.basename, e);
                }
                let raw = vod.raw_capture_path();
                if raw.exists() {
                    let _pause = ctx.services.watcher.pause(&vod.uuid);
                    if let Err(e) = tokio::fs::remove_file(&raw).await {
                        warn!("Could not remove raw capture {}: {}", raw.display(), e);
                    }
                }
                if let Err(e) = vod.finalize(&ctx).await {
                    error!("Finalize of {} failed: {}", vod.basename, e);
                }
            } else {
                error!("Remux of {} failed, raw capture kept", vod.basename);
            }

            vod.save_json(&ctx, "remux finished").await?;
            vod.channel_uuid.clone()
        };
        self.reconcile(vod_uuid, "remux finished").await?;

        if success {
            match self.cleanup_channel(&channel_uuid, Some(vod_uuid)).await {
                Ok(report) if report.succeeded + report.failed > 0 => {
                    info!("Retention cleanup: {}", report)
                }
                Ok(_) => {}
                Err(e) => warn!("Retention cleanup skipped: {}", e),
            }
        }
        self.broadcast_channel(&channel_uuid);
        Ok(())
    }

    /// 平台直播事件
    pub async fn handle_stream_event(&mut self, event: StreamEvent) -> Result<()> {
        let channel_uuid = self
            .registry
            .find_channel(&event.channel_identifier)
            .map(|c| c.uuid.clone())
            .ok_or_else(|| ArchiveError::ChannelNotFound(event.channel_identifier.clone()))?;

        match event.event_type {
            StreamEventType::Online => self.handle_online(&channel_uuid, event).await,
            StreamEventType::Offline => self.handle_offline(&channel_uuid, event).await,
            StreamEventType::Update => self.handle_update(&channel_uuid, event).await,
        }
    }

    async fn handle_online(&mut self, channel_uuid: &str, event: StreamEvent) -> Result<()> {
        let capture_id = event
            .capture_id
            .clone()
            .unwrap_or_else(|| event.timestamp.timestamp().to_string());
        if self.registry.vod_by_capture_id(channel_uuid, &capture_id).is_some() {
            debug!("Duplicate online event for capture {}", capture_id);
            return Ok(());
        }
        if let Some(current) = self.current_vod_uuid(channel_uuid) {
            warn!("{} is already capturing {}, ignoring online event", channel_uuid, current);
            return Ok(());
        }

        let (name, no_capture, matches) = match self.registry.channel(channel_uuid) {
            Some(c) => (
                c.internal_name.clone(),
                c.no_capture,
                c.matches_title(event.title.as_deref()),
            ),
            None => return Err(ArchiveError::ChannelNotFound(channel_uuid.to_string())),
        };
        if no_capture {
            info!("{} went live, capture disabled", name);
            return Ok(());
        }
        if !matches {
            info!("{} went live, title does not match filters", name);
            return Ok(());
        }

        info!("🔴 {} went live ({})", name, capture_id);
        let vod_uuid = self.create_vod(channel_uuid, &capture_id, event.timestamp).await?;
        {
            let (vod, ctx) = self.vod_with_context(&vod_uuid)?;
            vod.stream_title = event.title.clone();
            if let Some(chapter) = stream_event_chapter(vod.provider(), &event) {
                vod.add_chapter(chapter);
            }
            vod.begin_capture(&ctx, Utc::now()).await?;
        }
        self.broadcast_channel(channel_uuid);
        Ok(())
    }

    async fn handle_offline(&mut self, channel_uuid: &str, event: StreamEvent) -> Result<()> {
        let Some(vod_uuid) = self.current_vod_uuid(channel_uuid) else {
            debug!("{} went offline with no capture running", channel_uuid);
            return Ok(());
        };
        let (vod, ctx) = self.vod_with_context(&vod_uuid)?;
        info!("⚫ {} went offline", vod.basename);
        if vod.ended_at.is_none() {
            vod.ended_at = Some(event.timestamp);
        }
        vod.save_json(&ctx, "stream offline").await
    }

    async fn handle_update(&mut self, channel_uuid: &str, event: StreamEvent) -> Result<()> {
        let Some(vod_uuid) = self.current_vod_uuid(channel_uuid) else {
            debug!("Update for {} with no capture running", channel_uuid);
            return Ok(());
        };
        let (vod, ctx) = self.vod_with_context(&vod_uuid)?;
        let Some(chapter) = stream_event_chapter(vod.provider(), &event) else {
            return Ok(());
        };

        let changed = vod
            .chapters
            .last()
            .map(|last| last.title != chapter.title || last.game_id() != chapter.game_id())
            .unwrap_or(true);
        if event.title.is_some() {
            vod.stream_title = event.title.clone();
        }
        if changed {
            info!("New chapter '{}' in {}", chapter.title, vod.basename);
            vod.add_chapter(chapter);
        }
        vod.save_json(&ctx, "stream update").await
    }

    fn detach_vod(&mut self, vod_uuid: &str, json_path: &Path, remove_db_entry: bool) -> Result<Option<Vod>> {
        let vod = self.registry.remove_vod(vod_uuid);
        self.services.watcher.unwatch(vod_uuid);
        self.services.broadcaster.cancel(vod_uuid);

        if remove_db_entry {
            if let Some(channel_uuid) = vod.as_ref().map(|v| v.channel_uuid.clone()) {
                if let Some(channel) = self.registry.channel_mut(&channel_uuid) {
                    channel.remove_vods_db_entry(&self.config, json_path)?;
                }
            }
        }
        Ok(vod)
    }

    fn broadcast_removed(&self, vod_uuid: &str, channel_uuid: &str) {
        self.services.broadcaster.schedule(
            vod_uuid,
            EVENT_VOD_REMOVED,
            serde_json::json!({ "uuid": vod_uuid, "channel_uuid": channel_uuid }),
        );
    }

    /// 删除 VOD 文件并卸载，受保护时不做任何改动
    pub async fn delete_vod(&mut self, vod_uuid: &str) -> Result<()> {
        let (json_path, channel_uuid, basename) = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            if vod.prevent_deletion {
                return Err(ArchiveError::DeletionPrevented(vod_uuid.to_string()));
            }
            vod.delete_files(&ctx).await?;
            (vod.json_path(), vod.channel_uuid.clone(), vod.basename.clone())
        };

        self.detach_vod(vod_uuid, &json_path, true)?;
        self.broadcast_removed(vod_uuid, &channel_uuid);
        self.broadcast_channel(&channel_uuid);
        info!("🗑️ Deleted VOD {}", basename);
        Ok(())
    }

    /// 仅从内存卸载，不动磁盘
    pub fn remove_vod(&mut self, vod_uuid: &str) -> Result<()> {
        let json_path = self
            .registry
            .vod(vod_uuid)
            .map(Vod::json_path)
            .ok_or_else(|| ArchiveError::VodNotFound(vod_uuid.to_string()))?;
        if let Some(vod) = self.detach_vod(vod_uuid, &json_path, false)? {
            info!("Unloaded VOD {}", vod.basename);
            self.broadcast_channel(&vod.channel_uuid);
        }
        Ok(())
    }

    /// 卸载频道全部 VOD
    pub fn clear_vods(&mut self, channel_uuid: &str) -> Result<usize> {
        self.channel_exists(channel_uuid)?;
        let removed = self.registry.clear_vods(channel_uuid);
        for vod in &removed {
            self.services.watcher.unwatch(&vod.uuid);
            self.services.broadcaster.cancel(&vod.uuid);
        }
        self.broadcast_channel(channel_uuid);
        Ok(removed.len())
    }

    /// 逐个删除频道全部 VOD，单个失败不中断
    pub async fn delete_all_vods(&mut self, channel_uuid: &str) -> Result<BatchReport> {
        self.channel_exists(channel_uuid)?;
        let uuids: Vec<String> = self
            .registry
            .vods_by_channel(channel_uuid)
            .iter()
            .map(|v| v.uuid.clone())
            .collect();
        if uuids.is_empty() {
            return Err(ArchiveError::InvalidParameter(format!(
                "Channel {} has no VODs",
                channel_uuid
            )));
        }

        let mut report = BatchReport::default();
        for uuid in uuids {
            match self.delete_vod(&uuid).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Could not delete VOD {}: {}", uuid, e);
                    report.failed += 1;
                }
            }
        }
        info!("Deleted VODs of {}: {}", channel_uuid, report);
        Ok(report)
    }

    pub async fn delete_segment(&mut self, vod_uuid: &str, index: usize, keep_entry: bool) -> Result<()> {
        let channel_uuid = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            vod.delete_segment(&ctx, index, keep_entry).await?;
            vod.channel_uuid.clone()
        };
        self.broadcast_channel(&channel_uuid);
        Ok(())
    }

    /// 重命名 VOD 并更新频道数据库
    pub async fn rename_vod(&mut self, vod_uuid: &str, new_basename: &str) -> Result<()> {
        let (old_json, new_json, channel_uuid) = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            let old_json = vod.json_path();
            vod.change_base_name(&ctx, new_basename).await?;
            (old_json, vod.json_path(), vod.channel_uuid.clone())
        };
        self.sync_vods_db_entry(&channel_uuid, &old_json, &new_json)?;
        self.broadcast_channel(&channel_uuid);
        Ok(())
    }

    /// 移到保存目录并从频道卸载
    pub async fn archive_vod(&mut self, vod_uuid: &str) -> Result<PathBuf> {
        let destination = self.config.storage.saved_vods.clone();
        let (old_json, channel_uuid, basename) = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            let old_json = vod.json_path();
            vod.move_to(&ctx, &destination).await?;
            (old_json, vod.channel_uuid.clone(), vod.basename.clone())
        };
        self.detach_vod(vod_uuid, &old_json, true)?;
        self.broadcast_removed(vod_uuid, &channel_uuid);
        self.broadcast_channel(&channel_uuid);
        info!("Archived {} to {}", basename, destination.display());
        Ok(destination)
    }

    pub async fn remove_short_chapters(&mut self, vod_uuid: &str, min_seconds: f64) -> Result<usize> {
        let (vod, ctx) = self.vod_with_context(vod_uuid)?;
        vod.remove_short_chapters(&ctx, min_seconds).await
    }

    /// 按保留策略删除旧 VOD，`ignore_uuid` 不参与计数也不会被删除
    pub async fn cleanup_channel(&mut self, channel_uuid: &str, ignore_uuid: Option<&str>) -> Result<BatchReport> {
        let candidates = {
            let channel = self
                .registry
                .channel(channel_uuid)
                .ok_or_else(|| ArchiveError::ChannelNotFound(channel_uuid.to_string()))?;
            let vods = self.registry.vods_by_channel(channel_uuid);
            channel.cleanup_candidates(&vods, &self.config.retention, ignore_uuid)
        };

        let mut report = BatchReport::default();
        for uuid in candidates {
            match self.delete_vod(&uuid).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Retention could not delete {}: {}", uuid, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// 对账单个 VOD；改名后同步频道数据库
    pub async fn reconcile(&mut self, vod_uuid: &str, source: &str) -> Result<bool> {
        let (settled, channel_uuid, old_json, new_json) = {
            let (vod, ctx) = self.vod_with_context(vod_uuid)?;
            let old_json = vod.json_path();
            let settled = reconcile_vod(vod, &ctx, source).await;
            (settled, vod.channel_uuid.clone(), old_json, vod.json_path())
        };
        self.sync_vods_db_entry(&channel_uuid, &old_json, &new_json)?;
        Ok(settled)
    }

    /// 记录文件路径变化时替换数据库条目
    fn sync_vods_db_entry(&mut self, channel_uuid: &str, old_json: &Path, new_json: &Path) -> Result<()> {
        if old_json == new_json {
            return Ok(());
        }
        let config = self.config.clone();
        if let Some(channel) = self.registry.channel_mut(channel_uuid) {
            channel.remove_vods_db_entry(&config, old_json)?;
            channel.add_vods_db_entry(&config, new_json)?;
            info!(
                "VOD database of {}: {} -> {}",
                channel.internal_name,
                old_json.display(),
                new_json.display()
            );
        }
        Ok(())
    }

    /// 对账全部已加载 VOD，返回仍有问题的数量
    pub async fn reconcile_all(&mut self, source: &str) -> usize {
        let mut unresolved = 0;
        for uuid in self.registry.vod_uuids() {
            match self.reconcile(&uuid, source).await {
                Ok(true) => {}
                Ok(false) => unresolved += 1,
                Err(e) => debug!("Skipping {}: {}", uuid, e),
            }
        }
        unresolved
    }

    /// 文件监视事件
    pub async fn handle_watch_event(&mut self, event: WatchEvent) -> Result<()> {
        let Some(vod) = self.registry.vod(&event.owner) else {
            debug!("Watch event for unknown owner {}", event.owner);
            return Ok(());
        };
        let channel_uuid = vod.channel_uuid.clone();
        let is_record = event.path == vod.json_path();
        let is_segment = vod.segments.iter().any(|s| s.filename == event.path);

        if is_record && event.kind == WatchEventKind::Removed {
            warn!("Record {} was removed outside the archiver", event.path.display());
            let config = self.config.clone();
            for vod in self.registry.clean_lingering_vods(Some(&channel_uuid)) {
                self.services.watcher.unwatch(&vod.uuid);
                self.broadcast_removed(&vod.uuid, &channel_uuid);
                if let Some(channel) = self.registry.channel_mut(&channel_uuid) {
                    channel.remove_vods_db_entry(&config, &vod.json_path())?;
                }
            }
            if let Some(channel) = self.registry.channel(&channel_uuid) {
                let vods = self.registry.vods_by_channel(&channel_uuid);
                channel.check_stale_vods_in_memory(&self.config, &vods);
            }
            self.broadcast_channel(&channel_uuid);
        } else if is_segment {
            {
                let (vod, _ctx) = self.vod_with_context(&event.owner)?;
                info!("Segment {} of {} {:?}", event.path.display(), vod.basename, event.kind);
                if let Err(e) = vod.parse_segments() {
                    warn!("Segments of {} invalid: {}", vod.basename, e);
                }
            }
            self.reconcile(&event.owner, "file watcher").await?;
            let (vod, ctx) = self.vod_with_context(&event.owner)?;
            vod.broadcast_update(&ctx);
        } else {
            debug!("Ignoring {:?} of {}", event.kind, event.path.display());
        }
        Ok(())
    }
}
