//! 录制状态迁移与定型

use super::chapter::{self, Chapter};
use super::exports::{self, NfoInfo};
use super::Vod;
use crate::context::VodContext;
use crate::coordinator::ArchiveEvent;
use crate::jobs::{capture_job_name, contact_sheet_job_name, convert_job_name, JobSpec};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// ffmpeg 转封装参数，不重新编码
pub fn remux_args(input: &Path, output: &Path, audio_only: bool) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ];
    if !audio_only {
        args.push("-bsf:a".to_string());
        args.push("aac_adtstoasc".to_string());
    }
    let is_mp4 = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);
    if is_mp4 {
        args.push("-movflags".to_string());
        args.push("faststart".to_string());
    }
    args.push(output.display().to_string());
    args
}

fn parse_grid(grid: &str) -> (u32, u32) {
    grid.split_once('x')
        .and_then(|(c, r)| Some((c.trim().parse().ok()?, r.trim().parse().ok()?)))
        .filter(|(c, r): &(u32, u32)| *c > 0 && *r > 0)
        .unwrap_or((4, 4))
}

fn seconds(value: f64) -> ChronoDuration {
    ChronoDuration::milliseconds((value * 1000.0).round() as i64)
}

impl Vod {
    fn is_audio_only(ctx: &VodContext<'_>) -> bool {
        ctx.channel.map(|c| c.is_audio_only()).unwrap_or(false)
    }

    /// 转封装输出文件
    pub fn output_path(&self, ctx: &VodContext<'_>) -> PathBuf {
        let container = if Self::is_audio_only(ctx) {
            &ctx.config.media.audio_container
        } else {
            &ctx.config.media.vod_container
        };
        self.path_with_suffix(&format!(".{}", container))
    }

    /// not_started → capturing，启动录制任务
    pub async fn begin_capture(&mut self, ctx: &VodContext<'_>, now: DateTime<Utc>) -> Result<()> {
        let channel = ctx.channel(&self.uuid, &self.channel_uuid)?;

        self.not_started = false;
        self.is_capturing = true;
        self.capture_started = Some(now);
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.save_json(ctx, "capture started").await?;

        let name = capture_job_name(&self.basename);
        let args = vec![
            "--hls-live-restart".to_string(),
            "--output".to_string(),
            self.raw_capture_path().display().to_string(),
            channel.live_url(),
            channel.quality.join(","),
        ];
        let mut spec = JobSpec::new(name.clone(), ctx.config.media.streamlink_path.clone(), args);
        spec.cwd = Some(self.directory.clone());

        if let Err(e) = ctx.services.supervisor.start(spec).await {
            error!("Could not start capture of {}: {}", self.basename, e);
            self.is_capturing = false;
            self.save_json(ctx, "capture failed to start").await?;
            return Err(e);
        }
        info!("🎥 Capturing {} ({})", channel.internal_name, self.basename);

        let supervisor = ctx.services.supervisor.clone();
        let events = ctx.services.events.clone();
        let vod_uuid = self.uuid.clone();
        tokio::spawn(async move {
            let success = match supervisor.wait(&name).await {
                Ok(exit) => exit.success,
                Err(e) => {
                    warn!("Lost track of capture job {}: {}", name, e);
                    false
                }
            };
            let _ = events.send(ArchiveEvent::CaptureExited { vod_uuid, success });
        });
        Ok(())
    }

    /// capturing → converting，启动转封装后立即返回
    pub async fn end_capture(&mut self, ctx: &VodContext<'_>, now: DateTime<Utc>) -> Result<()> {
        self.is_capturing = false;
        self.is_converting = true;
        if self.capture_started2.is_none() {
            self.capture_started2 = Some(now);
        }
        self.conversion_started = Some(now);
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        if let Some(open) = self.stream_pauses.iter_mut().find(|p| p.end.is_none()) {
            open.end = Some(now);
        }
        self.save_json(ctx, "capture ended").await?;

        let raw = self.raw_capture_path();
        if !raw.exists() {
            error!("Capture of {} produced no file at {}", self.basename, raw.display());
            self.is_converting = false;
            self.save_json(ctx, "no capture output").await?;
            return Err(ArchiveError::FileNotFound(raw.display().to_string()));
        }

        let output = self.output_path(ctx);
        if let Err(e) = self.start_remux(ctx, raw, output).await {
            self.is_converting = false;
            self.save_json(ctx, "remux failed to start").await?;
            return Err(e);
        }
        Ok(())
    }

    /// 启动转封装任务，完成后通过事件队列通知协调器
    pub async fn start_remux(&self, ctx: &VodContext<'_>, input: PathBuf, output: PathBuf) -> Result<()> {
        let name = convert_job_name(&self.basename);
        let args = remux_args(&input, &output, Self::is_audio_only(ctx));
        let mut spec = JobSpec::new(name.clone(), ctx.config.media.ffmpeg_path.clone(), args);
        spec.cwd = Some(self.directory.clone());
        ctx.services.supervisor.start(spec).await?;
        info!("Remuxing {} -> {}", input.display(), output.display());

        let supervisor = ctx.services.supervisor.clone();
        let events = ctx.services.events.clone();
        let vod_uuid = self.uuid.clone();
        tokio::spawn(async move {
            let success = match supervisor.wait(&name).await {
                Ok(exit) => {
                    if !exit.success {
                        error!("Remux job {} failed: {}", name, exit.stderr_tail.join(" | "));
                    }
                    exit.success
                }
                Err(e) => {
                    error!("Lost track of remux job {}: {}", name, e);
                    false
                }
            };
            let _ = events.send(ArchiveEvent::RemuxFinished { vod_uuid, output, success });
        });
        Ok(())
    }

    /// converting → finalized
    ///
    /// 每个子步骤单独捕获错误，可选步骤失败不影响定型。
    pub async fn finalize(&mut self, ctx: &VodContext<'_>) -> Result<()> {
        info!("Finalizing {}", self.basename);

        if let Err(e) = self.remove_playlist(ctx).await {
            warn!("Could not remove playlist of {}: {}", self.basename, e);
        }

        if let Err(e) = self.probe_segments(ctx).await {
            error!("Media info of {} unavailable: {}", self.basename, e);
        }

        if self.chapters.is_empty() {
            match self.default_chapter() {
                Some(chapter) => {
                    debug!("Synthesizing default chapter for {}", self.basename);
                    self.chapters.push(chapter);
                }
                None => warn!("No start time for {}, cannot add a default chapter", self.basename),
            }
        }
        self.calculate_chapters();

        let llc = exports::losslesscut_csv(&self.chapters);
        if let Err(e) = self.write_artifact(ctx, "-llc-edl.csv", llc).await {
            warn!("LosslessCut export of {} failed: {}", self.basename, e);
        }

        let ffmpeg = exports::ffmpeg_chapters(&self.chapters);
        if let Err(e) = self.write_artifact(ctx, "-ffmpeg-chapters.txt", ffmpeg).await {
            warn!("Chapter metadata export of {} failed: {}", self.basename, e);
        }

        let vtt = exports::vtt_chapters(&self.chapters, &ctx.config.naming.app_name);
        if let Err(e) = self.write_artifact(ctx, ".chapters.vtt", vtt).await {
            warn!("VTT export of {} failed: {}", self.basename, e);
        }

        if ctx.config.media.create_kodi_nfo {
            let nfo = self.kodi_nfo(ctx);
            if let Err(e) = self.write_artifact(ctx, ".nfo", nfo).await {
                warn!("NFO export of {} failed: {}", self.basename, e);
            }
        }

        if ctx.config.media.contact_sheet {
            if let Err(e) = self.create_contact_sheet(ctx).await {
                warn!("Contact sheet of {} failed: {}", self.basename, e);
            }
        }

        self.calculate_chapters();
        self.is_finalized = true;
        info!("✅ Finalized {}", self.basename);
        Ok(())
    }

    async fn remove_playlist(&self, ctx: &VodContext<'_>) -> Result<()> {
        let playlist = self.path_with_suffix(".m3u8");
        if playlist.exists() {
            let _pause = ctx.services.watcher.pause(&self.uuid);
            tokio::fs::remove_file(&playlist).await?;
        }
        Ok(())
    }

    /// 探测全部现存分段并补全结束时间
    pub async fn probe_segments(&mut self, ctx: &VodContext<'_>) -> Result<()> {
        let mut probed = 0;
        let mut last_error = None;

        for segment in self.segments.iter_mut().filter(|s| !s.deleted) {
            match ctx.services.probe.probe(&segment.filename).await {
                Ok(info) => {
                    self.segments_metadata.insert(segment.basename.clone(), info.clone());
                    segment.media = Some(info);
                    probed += 1;
                }
                Err(e) => {
                    warn!("Probe of {} failed: {}", segment.filename.display(), e);
                    last_error = Some(e);
                }
            }
        }

        if self.stream_resolution.is_none() {
            self.stream_resolution = self
                .segments
                .iter()
                .find_map(|s| s.media.as_ref().and_then(|m| m.resolution()));
        }

        if self.ended_at.is_none() {
            if let (Some(start), Some(duration)) = (self.started_at, self.duration()) {
                self.ended_at = Some(start + seconds(duration));
            }
        }

        match (probed, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// 覆盖整个 VOD 的默认章节
    pub fn default_chapter(&self) -> Option<Chapter> {
        let started_at = self.started_at.or(self.created_at)?;
        let title = self
            .stream_title
            .clone()
            .unwrap_or_else(|| self.basename.clone());
        Some(Chapter::new(
            started_at,
            title,
            self.external.capabilities().default_chapter_details(),
        ))
    }

    /// 重新计算章节偏移与时长
    pub fn calculate_chapters(&mut self) -> bool {
        let Some(start) = self.started_at.or(self.created_at) else {
            warn!("{} has no start time, chapters left as-is", self.basename);
            return false;
        };
        let end = self
            .ended_at
            .or_else(|| self.duration().map(|d| start + seconds(d)));
        chapter::calculate_chapters(&mut self.chapters, start, end);
        true
    }

    pub fn add_chapter(&mut self, chapter: Chapter) {
        debug!("Chapter '{}' added to {}", chapter.title, self.basename);
        self.chapters.push(chapter);
        self.calculate_chapters();
    }

    /// 删除不长于 `min_seconds` 的章节，至少保留一个，返回删除数量
    pub async fn remove_short_chapters(&mut self, ctx: &VodContext<'_>, min_seconds: f64) -> Result<usize> {
        self.calculate_chapters();
        let before = self.chapters.len();

        let is_long = |c: &Chapter| c.duration.map(|d| d > min_seconds).unwrap_or(true);
        if self.chapters.iter().any(is_long) {
            self.chapters.retain(is_long);
        } else if let Some(longest) = self
            .chapters
            .iter()
            .max_by(|a, b| a.duration.unwrap_or(0.0).total_cmp(&b.duration.unwrap_or(0.0)))
            .cloned()
        {
            self.chapters = vec![longest];
        }

        let removed = before - self.chapters.len();
        if removed > 0 {
            self.calculate_chapters();
            info!("Removed {} short chapters from {}", removed, self.basename);
            self.save_json(ctx, "short chapters removed").await?;
        }
        Ok(removed)
    }

    async fn write_artifact(&self, ctx: &VodContext<'_>, suffix: &str, content: String) -> Result<()> {
        let path = self.path_with_suffix(suffix);
        let _pause = ctx.services.watcher.pause(&self.uuid);
        tokio::fs::write(&path, content).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn kodi_nfo(&self, ctx: &VodContext<'_>) -> String {
        let capabilities = self.external.capabilities();
        let show_title = ctx
            .channel
            .map(|c| c.display_name.as_str())
            .unwrap_or(self.channel_uuid.as_str());
        let title = self.stream_title.as_deref().unwrap_or(self.basename.as_str());
        exports::kodi_nfo(&NfoInfo {
            title,
            show_title,
            provider: self.provider().as_str(),
            unique_id: capabilities.external_vod_id().unwrap_or(self.uuid.as_str()),
            uuid: &self.uuid,
            season: self.stream_season.as_deref(),
            episode: self.stream_number,
            duration: self.duration(),
            started_at: self.started_at,
            chapters: &self.chapters,
        })
    }

    /// 启动并等待缩略图任务
    async fn create_contact_sheet(&self, ctx: &VodContext<'_>) -> Result<()> {
        let input = self
            .segments
            .iter()
            .find(|s| !s.deleted)
            .ok_or_else(|| ArchiveError::FileNotFound(format!("{} has no segment", self.basename)))?;
        let output = self.path_with_suffix("-contact_sheet.png");

        let (columns, rows) = parse_grid(&ctx.config.media.contact_sheet_grid);
        let interval = (self.duration().unwrap_or(0.0) / f64::from(columns * rows)).max(1.0);
        let args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.filename.display().to_string(),
            "-vf".to_string(),
            format!(
                "fps=1/{:.3},scale={}:-1,tile={}x{}",
                interval, ctx.config.media.contact_sheet_width, columns, rows
            ),
            "-frames:v".to_string(),
            "1".to_string(),
            output.display().to_string(),
        ];

        let name = contact_sheet_job_name(&self.basename);
        let mut spec = JobSpec::new(name.clone(), ctx.config.media.ffmpeg_path.clone(), args);
        spec.cwd = Some(self.directory.clone());

        let _pause = ctx.services.watcher.pause(&self.uuid);
        ctx.services.supervisor.start(spec).await?;
        let exit = ctx.services.supervisor.wait(&name).await?;
        if !exit.success {
            return Err(ArchiveError::JobFailed {
                job: name,
                reason: exit.stderr_tail.join(" | "),
            });
        }
        if !output.exists() {
            return Err(ArchiveError::FileNotFound(output.display().to_string()));
        }
        debug!("Contact sheet written to {}", output.display());
        Ok(())
    }
}
