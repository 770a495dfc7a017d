//! VOD 自愈对账
//!
//! 每次调用最多执行一个修复，返回 `true` 表示本轮未发现问题。
//! 检查按优先级依次进行；前置条件无法满足的一次性修复记入已尝试集合，
//! 在 VOD 的内存生命周期内不再重复。

use crate::context::VodContext;
use crate::jobs::{capture_job_name, convert_job_name};
use crate::vod::segment::{has_illegal_chars, sanitize_filename};
use crate::vod::Vod;
use chrono::Utc;
use tracing::{debug, error, info, warn};

/// 对账检查项，顺序即优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixIssue {
    NotStarted,
    LegacyMetadata,
    IllegalBasename,
    FinalizedWithoutSegments,
    SegmentsNotFinalized,
    StaleCapture,
    StaleConversion,
    MissingSegments,
    PendingRemux,
    LegacyContainer,
    MissingEndTime,
    MissingDefaultChapter,
    NeverRecorded,
    ContradictedFailure,
    ZeroDuration,
    MissingUuid,
}

async fn persist(vod: &mut Vod, ctx: &VodContext<'_>, issue: FixIssue) {
    if let Err(e) = vod.save_json(ctx, &format!("fix {:?}", issue)).await {
        error!("Could not save {} after {:?}: {}", vod.basename, issue, e);
        vod.tried_fixes.insert(issue);
    }
}

fn tried(vod: &Vod, issue: FixIssue) -> bool {
    vod.tried_fixes.contains(&issue)
}

/// 单次对账，从不向外传播错误
pub async fn fix_issues(vod: &mut Vod, ctx: &VodContext<'_>, source: &str) -> bool {
    if vod.not_started {
        debug!("{} not started yet, nothing to reconcile ({})", vod.basename, source);
        return true;
    }

    // 旧版整段元数据迁移到第一个分段
    let issue = FixIssue::LegacyMetadata;
    if !tried(vod, issue)
        && vod.video_metadata.is_some()
        && vod.segments.first().map(|s| s.media.is_none()).unwrap_or(false)
    {
        if let Some(media) = vod.video_metadata.take() {
            info!("Migrating legacy metadata of {} ({})", vod.basename, source);
            let first = &mut vod.segments[0];
            vod.segments_metadata.insert(first.basename.clone(), media.clone());
            first.media = Some(media);
            persist(vod, ctx, issue).await;
            return false;
        }
    }

    let issue = FixIssue::IllegalBasename;
    if !tried(vod, issue) && has_illegal_chars(&vod.basename) {
        vod.tried_fixes.insert(issue);
        let sanitized = sanitize_filename(&vod.basename);
        warn!("Basename '{}' is invalid, renaming to '{}' ({})", vod.basename, sanitized, source);
        if let Err(e) = vod.change_base_name(ctx, &sanitized).await {
            error!("Rename of {} failed: {}", vod.basename, e);
        }
        return false;
    }

    let issue = FixIssue::FinalizedWithoutSegments;
    if !tried(vod, issue) && vod.is_finalized && vod.segments.is_empty() {
        vod.tried_fixes.insert(issue);
        match vod
            .rebuild_segment_list(ctx, ctx.config.reconcile.include_misnamed_files)
            .await
        {
            Ok(()) => {
                info!("Recovered segments of finalized {} ({})", vod.basename, source);
                return false;
            }
            Err(e) => warn!("Finalized {} has no segments: {}", vod.basename, e),
        }
    }

    let issue = FixIssue::SegmentsNotFinalized;
    if !tried(vod, issue)
        && !vod.segments.is_empty()
        && !vod.is_capturing
        && !vod.is_converting
        && !vod.is_finalized
    {
        vod.tried_fixes.insert(issue);
        info!("{} has segments but was never finalized ({})", vod.basename, source);
        if let Err(e) = vod.finalize(ctx).await {
            error!("Finalize of {} failed: {}", vod.basename, e);
        }
        persist(vod, ctx, issue).await;
        return false;
    }

    let issue = FixIssue::StaleCapture;
    if !tried(vod, issue) && vod.is_capturing {
        let status = ctx
            .services
            .supervisor
            .status(&capture_job_name(&vod.basename))
            .await;
        if !status.is_running() {
            warn!("{} is marked capturing but no capture is running ({})", vod.basename, source);
            vod.is_capturing = false;
            persist(vod, ctx, issue).await;
            return false;
        }
    }

    let issue = FixIssue::StaleConversion;
    if !tried(vod, issue) && vod.is_converting {
        let status = ctx
            .services
            .supervisor
            .status(&convert_job_name(&vod.basename))
            .await;
        if !status.is_running() {
            warn!("{} is marked converting but no remux is running ({})", vod.basename, source);
            vod.is_converting = false;
            persist(vod, ctx, issue).await;
            return false;
        }
    }

    let issue = FixIssue::MissingSegments;
    if !tried(vod, issue)
        && !vod.is_finalized
        && !vod.is_capturing
        && !vod.is_converting
        && vod.segments.is_empty()
    {
        vod.tried_fixes.insert(issue);
        match vod
            .rebuild_segment_list(ctx, ctx.config.reconcile.include_misnamed_files)
            .await
        {
            Ok(()) => {
                info!("Recovered segments of {} ({})", vod.basename, source);
                return false;
            }
            Err(e) => debug!("No segments to recover for {}: {}", vod.basename, e),
        }
    }

    let unconverted = !vod.is_capturing && !vod.is_converted() && !vod.is_finalized;

    let issue = FixIssue::PendingRemux;
    let raw = vod.raw_capture_path();
    if !tried(vod, issue) && unconverted && !vod.is_converting && raw.exists() {
        vod.tried_fixes.insert(issue);
        let output = vod.output_path(ctx);
        if output.exists() {
            warn!("{} exists next to raw capture, not remuxing again", output.display());
        } else {
            info!("Remuxing leftover capture of {} ({})", vod.basename, source);
            vod.is_converting = true;
            vod.conversion_started = Some(Utc::now());
            if let Err(e) = vod.start_remux(ctx, raw, output).await {
                error!("Could not start remux of {}: {}", vod.basename, e);
                vod.is_converting = false;
            }
            persist(vod, ctx, issue).await;
            return false;
        }
    }

    let issue = FixIssue::LegacyContainer;
    let legacy = vod.legacy_output_path();
    if !tried(vod, issue) && unconverted && !vod.raw_capture_path().exists() && legacy.exists() {
        vod.tried_fixes.insert(issue);
        info!("Adopting legacy output {} ({})", legacy.display(), source);
        let name = legacy
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if let Err(e) = vod.add_segment(&name) {
            error!("Could not adopt {}: {}", name, e);
        } else if let Err(e) = vod.finalize(ctx).await {
            error!("Finalize of {} failed: {}", vod.basename, e);
        }
        persist(vod, ctx, issue).await;
        return false;
    }

    let issue = FixIssue::MissingEndTime;
    if !tried(vod, issue) && vod.is_finalized && vod.ended_at.is_none() {
        vod.tried_fixes.insert(issue);
        if let (Some(start), Some(duration)) = (vod.started_at, vod.duration()) {
            vod.ended_at = Some(start + chrono::Duration::milliseconds((duration * 1000.0).round() as i64));
            info!("Derived end time of {} ({})", vod.basename, source);
            vod.calculate_chapters();
            persist(vod, ctx, issue).await;
            return false;
        }
        debug!("Cannot derive end time of {}", vod.basename);
    }

    let issue = FixIssue::MissingDefaultChapter;
    if !tried(vod, issue)
        && vod.is_finalized
        && vod.chapters.is_empty()
        && vod.external.capabilities().requires_default_chapter()
    {
        vod.tried_fixes.insert(issue);
        if let Some(chapter) = vod.default_chapter() {
            info!("Adding default chapter to {} ({})", vod.basename, source);
            vod.add_chapter(chapter);
            persist(vod, ctx, issue).await;
            return false;
        }
    }

    let issue = FixIssue::NeverRecorded;
    if !tried(vod, issue)
        && !vod.is_capturing
        && !vod.is_converting
        && !vod.is_finalized
        && !vod.is_converted()
        && !vod.failed
        && vod.segments.is_empty()
    {
        error!("{} never produced a recording, marking failed ({})", vod.basename, source);
        vod.failed = true;
        persist(vod, ctx, issue).await;
        return false;
    }

    let issue = FixIssue::ContradictedFailure;
    if !tried(vod, issue) && vod.failed && vod.is_finalized && !vod.segments.is_empty() {
        info!("{} is finalized with segments, clearing failed flag ({})", vod.basename, source);
        vod.failed = false;
        persist(vod, ctx, issue).await;
        return false;
    }

    let issue = FixIssue::ZeroDuration;
    if !tried(vod, issue)
        && vod.is_finalized
        && !vod.segments.is_empty()
        && vod.duration().unwrap_or(0.0) <= 0.0
    {
        vod.tried_fixes.insert(issue);
        let path = vod.segments[0].filename.clone();
        match ctx.services.probe.probe(&path).await {
            Ok(media) => {
                info!("Re-probed {} ({})", path.display(), source);
                let first = &mut vod.segments[0];
                vod.segments_metadata.insert(first.basename.clone(), media.clone());
                first.media = Some(media);
                vod.calculate_chapters();
                persist(vod, ctx, issue).await;
            }
            Err(e) => warn!("Re-probe of {} failed: {}", path.display(), e),
        }
        return false;
    }

    let issue = FixIssue::MissingUuid;
    if !tried(vod, issue) && vod.uuid.is_empty() {
        vod.uuid = uuid::Uuid::new_v4().to_string();
        info!("Assigned UUID {} to {} ({})", vod.uuid, vod.basename, source);
        persist(vod, ctx, issue).await;
        return false;
    }

    true
}

/// 反复对账直到无问题，超过上限时告警
pub async fn reconcile_vod(vod: &mut Vod, ctx: &VodContext<'_>, source: &str) -> bool {
    let max_passes = ctx.config.reconcile.max_fix_passes;
    for pass in 1..=max_passes {
        if fix_issues(vod, ctx, source).await {
            if pass > 1 {
                debug!("{} consistent after {} passes", vod.basename, pass);
            }
            return true;
        }
    }
    warn!(
        "{} still has issues after {} passes ({}), leaving as-is",
        vod.basename, max_passes, source
    );
    false
}
