use crate::broadcast::Broadcaster;
use crate::channel::Channel;
use crate::config::AppConfig;
use crate::coordinator::ArchiveEvent;
use crate::gateway::ProviderGateway;
use crate::jobs::JobSupervisor;
use crate::media::MediaProbe;
use crate::watcher::FileWatcher;
use common::{ArchiveError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// 外部协作方句柄
#[derive(Clone)]
pub struct Services {
    pub supervisor: Arc<dyn JobSupervisor>,
    pub probe: Arc<dyn MediaProbe>,
    pub watcher: FileWatcher,
    pub broadcaster: Broadcaster,
    /// 后台任务回报协调器
    pub events: mpsc::UnboundedSender<ArchiveEvent>,
    pub gateway: Arc<dyn ProviderGateway>,
}

/// VOD 操作所需的借用上下文
#[derive(Clone, Copy)]
pub struct VodContext<'a> {
    pub config: &'a AppConfig,
    pub services: &'a Services,
    pub channel: Option<&'a Channel>,
}

impl<'a> VodContext<'a> {
    pub fn new(config: &'a AppConfig, services: &'a Services, channel: Option<&'a Channel>) -> Self {
        Self { config, services, channel }
    }

    /// 解析所属频道，找不到时按最高级别记录
    pub fn channel(&self, vod_uuid: &str, channel_uuid: &str) -> Result<&'a Channel> {
        self.channel.ok_or_else(|| {
            error!(
                "VOD {} references channel {} which is not loaded",
                vod_uuid, channel_uuid
            );
            ArchiveError::ChannelNotFound(channel_uuid.to_string())
        })
    }
}
