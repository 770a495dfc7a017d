//! 协调任务：串行处理所有改变归档状态的事件
//!
//! 后台任务（采集、转封装、文件监视、定时对账）只通过事件通道与协调任务通信，
//! `Archive` 始终只被这一个任务持有。

use crate::archive::Archive;
use crate::channel::ChannelConfig;
use crate::watcher::WatchEvent;
use common::{ArchiveError, OperationOutcome, StreamEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 外部请求的操作
#[derive(Debug, Clone)]
pub enum Command {
    AddChannel(ChannelConfig),
    ApplyChannelConfig { channel_uuid: String, config: ChannelConfig },
    DeleteChannel { channel_uuid: String, delete_files: bool },
    DeleteVod { vod_uuid: String },
    RemoveVod { vod_uuid: String },
    ClearVods { channel_uuid: String },
    DeleteAllVods { channel_uuid: String },
    RenameVod { vod_uuid: String, basename: String },
    DeleteSegment { vod_uuid: String, index: usize, keep_entry: bool },
    ArchiveVod { vod_uuid: String },
    RemoveShortChapters { vod_uuid: String, min_seconds: f64 },
    CleanupChannel { channel_uuid: String },
}

#[derive(Debug)]
pub enum ArchiveEvent {
    Watch(WatchEvent),
    Stream(StreamEvent),
    CaptureExited { vod_uuid: String, success: bool },
    RemuxFinished { vod_uuid: String, output: PathBuf, success: bool },
    Reconcile { vod_uuid: String },
    ReconcileAll,
    Command(Command, oneshot::Sender<OperationOutcome>),
    Shutdown,
}

fn outcome<T>(result: Result<T, ArchiveError>, message: impl FnOnce(T) -> String) -> OperationOutcome {
    match result {
        Ok(value) => OperationOutcome::ok(message(value)),
        Err(e) => OperationOutcome::failed(e.to_string()),
    }
}

impl Archive {
    /// 处理单个事件，错误只记录不中断
    pub async fn handle_event(&mut self, event: ArchiveEvent) {
        let result = match event {
            ArchiveEvent::Watch(event) => self.handle_watch_event(event).await,
            ArchiveEvent::Stream(event) => self.handle_stream_event(event).await,
            ArchiveEvent::CaptureExited { vod_uuid, success } => {
                self.handle_capture_exited(&vod_uuid, success).await
            }
            ArchiveEvent::RemuxFinished { vod_uuid, output, success } => {
                self.handle_remux_finished(&vod_uuid, &output, success).await
            }
            ArchiveEvent::Reconcile { vod_uuid } => self.reconcile(&vod_uuid, "event").await.map(|_| ()),
            ArchiveEvent::ReconcileAll => {
                let unresolved = self.reconcile_all("interval").await;
                if unresolved > 0 {
                    warn!("{} VODs still inconsistent after reconcile", unresolved);
                }
                Ok(())
            }
            ArchiveEvent::Command(command, reply) => {
                let result = self.execute(command).await;
                if reply.send(result).is_err() {
                    debug!("Command caller went away before the reply");
                }
                Ok(())
            }
            ArchiveEvent::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            error!("Event handling failed: {}", e);
        }
    }

    pub async fn execute(&mut self, command: Command) -> OperationOutcome {
        debug!("Executing {:?}", command);
        match command {
            Command::AddChannel(config) => {
                outcome(self.add_channel(config).await, |uuid| format!("Channel {} added", uuid))
            }
            Command::ApplyChannelConfig { channel_uuid, config } => outcome(
                self.apply_channel_config(&channel_uuid, config).await,
                |_| format!("Channel {} updated", channel_uuid),
            ),
            Command::DeleteChannel { channel_uuid, delete_files } => outcome(
                self.delete_channel(&channel_uuid, delete_files).await,
                |report| format!("Channel {} deleted ({})", channel_uuid, report),
            ),
            Command::DeleteVod { vod_uuid } => {
                outcome(self.delete_vod(&vod_uuid).await, |_| format!("VOD {} deleted", vod_uuid))
            }
            Command::RemoveVod { vod_uuid } => {
                outcome(self.remove_vod(&vod_uuid), |_| format!("VOD {} unloaded", vod_uuid))
            }
            Command::ClearVods { channel_uuid } => outcome(self.clear_vods(&channel_uuid), |count| {
                format!("{} VODs unloaded from {}", count, channel_uuid)
            }),
            Command::DeleteAllVods { channel_uuid } => match self.delete_all_vods(&channel_uuid).await {
                Ok(report) if report.all_succeeded() => OperationOutcome::ok(format!("Deleted: {}", report)),
                Ok(report) => OperationOutcome::failed(format!("Deleted: {}", report)),
                Err(e) => OperationOutcome::failed(e.to_string()),
            },
            Command::RenameVod { vod_uuid, basename } => outcome(
                self.rename_vod(&vod_uuid, &basename).await,
                |_| format!("VOD renamed to {}", basename),
            ),
            Command::DeleteSegment { vod_uuid, index, keep_entry } => outcome(
                self.delete_segment(&vod_uuid, index, keep_entry).await,
                |_| format!("Segment {} of {} deleted", index, vod_uuid),
            ),
            Command::ArchiveVod { vod_uuid } => outcome(self.archive_vod(&vod_uuid).await, |path| {
                format!("VOD {} archived to {}", vod_uuid, path.display())
            }),
            Command::RemoveShortChapters { vod_uuid, min_seconds } => outcome(
                self.remove_short_chapters(&vod_uuid, min_seconds).await,
                |removed| format!("{} chapters removed from {}", removed, vod_uuid),
            ),
            Command::CleanupChannel { channel_uuid } => outcome(
                self.cleanup_channel(&channel_uuid, None).await,
                |report| format!("Cleanup of {}: {}", channel_uuid, report),
            ),
        }
    }
}

/// 事件循环
pub struct Coordinator {
    archive: Archive,
    events: mpsc::UnboundedReceiver<ArchiveEvent>,
    watch_events: mpsc::UnboundedReceiver<WatchEvent>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        archive: Archive,
        events: mpsc::UnboundedReceiver<ArchiveEvent>,
        watch_events: mpsc::UnboundedReceiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            archive,
            events,
            watch_events,
            cancel,
        }
    }

    /// 运行到取消或收到 Shutdown，返回归档状态
    pub async fn run(mut self) -> Archive {
        info!("🚀 Coordinator started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Coordinator cancelled");
                    break;
                }
                Some(event) = self.watch_events.recv() => {
                    self.archive.handle_event(ArchiveEvent::Watch(event)).await;
                }
                event = self.events.recv() => match event {
                    Some(ArchiveEvent::Shutdown) | None => {
                        info!("Coordinator shutting down");
                        break;
                    }
                    Some(event) => self.archive.handle_event(event).await,
                },
            }
        }
        self.archive
    }
}

/// 向协调任务投递事件的句柄
#[derive(Clone)]
pub struct ArchiveHandle {
    events: mpsc::UnboundedSender<ArchiveEvent>,
}

impl ArchiveHandle {
    pub fn new(events: mpsc::UnboundedSender<ArchiveEvent>) -> Self {
        Self { events }
    }

    pub fn send(&self, event: ArchiveEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn stream_event(&self, event: StreamEvent) -> bool {
        self.send(ArchiveEvent::Stream(event))
    }

    pub fn shutdown(&self) -> bool {
        self.send(ArchiveEvent::Shutdown)
    }

    /// 发送命令并等待结果
    pub async fn command(&self, command: Command) -> OperationOutcome {
        let (tx, rx) = oneshot::channel();
        if !self.send(ArchiveEvent::Command(command, tx)) {
            return OperationOutcome::failed("Coordinator is not running");
        }
        rx.await
            .unwrap_or_else(|_| OperationOutcome::failed("Coordinator dropped the command"))
    }

    /// 定时投递全量对账
    pub fn spawn_reconcile_ticker(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !handle.send(ArchiveEvent::ReconcileAll) {
                            break;
                        }
                    }
                }
            }
            debug!("Reconcile ticker stopped");
        })
    }
}
