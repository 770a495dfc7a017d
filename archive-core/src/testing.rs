//! 测试替身与夹具

use crate::archive::Archive;
use crate::broadcast::{Broadcaster, Dispatcher};
use crate::channel::ChannelConfig;
use crate::config::AppConfig;
use crate::context::Services;
use crate::coordinator::ArchiveEvent;
use crate::gateway::OfflineGateway;
use crate::jobs::{JobExit, JobSpec, JobSupervisor};
use crate::keyvalue::KeyValueStore;
use crate::media::MediaProbe;
use crate::watcher::{FileWatcher, WatchEvent};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::{
    ArchiveError, BroadcastMessage, JobStatus, MediaInfo, MediaKind, Provider, Result, StreamEvent,
    StreamEventType,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

/// 进程监管替身：采集任务保持运行直到 `finish`，其余任务默认立即结束
pub struct FakeSupervisor {
    /// None 表示运行中
    jobs: Mutex<HashMap<String, Option<bool>>>,
    started: Mutex<Vec<JobSpec>>,
    changed: Notify,
    remux_success: AtomicBool,
    hold_remux: AtomicBool,
    fail_start: AtomicBool,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            changed: Notify::new(),
            remux_success: AtomicBool::new(true),
            hold_remux: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started.lock().unwrap().iter().map(|s| s.name.clone()).collect()
    }

    pub fn set_running(&self, name: &str) {
        self.jobs.lock().unwrap().insert(name.to_string(), None);
    }

    pub fn finish(&self, name: &str, success: bool) {
        self.jobs.lock().unwrap().insert(name.to_string(), Some(success));
        self.changed.notify_waiters();
    }

    pub fn set_remux_success(&self, success: bool) {
        self.remux_success.store(success, Ordering::SeqCst);
    }

    /// 转封装任务也保持运行直到 `finish`
    pub fn set_hold_remux(&self, hold: bool) {
        self.hold_remux.store(hold, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// 模拟进程写出的文件
    fn output_of(spec: &JobSpec) -> Option<PathBuf> {
        if let Some(pos) = spec.args.iter().position(|a| a == "--output") {
            return spec.args.get(pos + 1).map(PathBuf::from);
        }
        if spec.name.starts_with("convert_") || spec.name.starts_with("contact_sheet_") {
            return spec.args.last().map(PathBuf::from);
        }
        None
    }
}

#[async_trait]
impl JobSupervisor for FakeSupervisor {
    async fn status(&self, name: &str) -> JobStatus {
        match self.jobs.lock().unwrap().get(name) {
            Some(None) => JobStatus::Running,
            _ => JobStatus::Stopped,
        }
    }

    async fn start(&self, spec: JobSpec) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ArchiveError::JobFailed {
                job: spec.name,
                reason: "spawn refused".to_string(),
            });
        }

        let is_convert = spec.name.starts_with("convert_");
        let held = spec.name.starts_with("capture_")
            || (is_convert && self.hold_remux.load(Ordering::SeqCst));
        let success = !is_convert || self.remux_success.load(Ordering::SeqCst);
        if success {
            if let Some(output) = Self::output_of(&spec) {
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&output, b"fake media")?;
            }
        }

        let state = if held { None } else { Some(success) };
        self.jobs.lock().unwrap().insert(spec.name.clone(), state);
        self.started.lock().unwrap().push(spec);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<JobExit> {
        loop {
            let notified = self.changed.notified();
            let state = self.jobs.lock().unwrap().get(name).copied();
            match state {
                Some(Some(success)) => {
                    return Ok(JobExit {
                        success,
                        code: Some(if success { 0 } else { 1 }),
                        stderr_tail: Vec::new(),
                    })
                }
                Some(None) => notified.await,
                None => {
                    return Err(ArchiveError::JobFailed {
                        job: name.to_string(),
                        reason: "unknown job".to_string(),
                    })
                }
            }
        }
    }

    fn progress(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// 固定时长的探测替身，文件不存在时失败
pub struct FakeProbe {
    duration: Mutex<f64>,
    fail: AtomicBool,
}

impl FakeProbe {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: Mutex::new(duration),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_duration(&self, duration: f64) {
        *self.duration.lock().unwrap() = duration;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if self.fail.load(Ordering::SeqCst) || !path.exists() {
            return Err(ArchiveError::ProbeFailed {
                path: path.display().to_string(),
                reason: "unreadable".to_string(),
            });
        }
        Ok(MediaInfo {
            duration: *self.duration.lock().unwrap(),
            width: Some(1920),
            height: Some(1080),
            fps: Some(60.0),
            kind: MediaKind::Video,
            size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        })
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    messages: Mutex<Vec<BroadcastMessage>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().map(|m| m.event.clone()).collect()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, event: &str, payload: serde_json::Value) {
        self.messages.lock().unwrap().push(BroadcastMessage {
            event: event.to_string(),
            payload,
        });
    }
}

pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.vod_root = root.join("vods");
    config.storage.config_dir = root.join("config");
    config.storage.vods_db = root.join("vods_db");
    config.storage.saved_vods = root.join("saved");
    config.broadcast.debounce = Duration::from_millis(10);
    config
}

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

pub fn stream_event(kind: StreamEventType, login: &str, capture_id: &str, at: DateTime<Utc>) -> StreamEvent {
    StreamEvent {
        event_type: kind,
        channel_identifier: login.to_string(),
        timestamp: at,
        capture_id: Some(capture_id.to_string()),
        title: Some("Morning stream".to_string()),
        category_id: Some("509658".to_string()),
        category_name: Some("Just Chatting".to_string()),
    }
}

/// 带替身服务的归档实例
pub struct Harness {
    pub dir: TempDir,
    pub archive: Archive,
    pub events: mpsc::UnboundedReceiver<ArchiveEvent>,
    pub watch_events: mpsc::UnboundedReceiver<WatchEvent>,
    pub supervisor: Arc<FakeSupervisor>,
    pub probe: Arc<FakeProbe>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        Self::build(dir, config)
    }

    /// 在同一目录上重建实例，模拟重启
    pub fn restart(self) -> Self {
        let config = (*self.archive.config).clone();
        Self::build(self.dir, config)
    }

    fn build(dir: TempDir, config: AppConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let (watcher, watch_events) = FileWatcher::new();
        let supervisor = Arc::new(FakeSupervisor::new());
        let probe = Arc::new(FakeProbe::new(300.0));
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let services = Services {
            supervisor: supervisor.clone(),
            probe: probe.clone(),
            watcher,
            broadcaster: Broadcaster::new(dispatcher.clone(), config.broadcast.debounce),
            events: tx,
            gateway: Arc::new(OfflineGateway),
        };
        let archive = Archive::new(Arc::new(config), services, KeyValueStore::in_memory());

        Self {
            dir,
            archive,
            events,
            watch_events,
            supervisor,
            probe,
            dispatcher,
        }
    }

    pub async fn add_channel(&mut self, login: &str) -> String {
        self.archive
            .add_channel(ChannelConfig::new(Provider::Twitch, login))
            .await
            .unwrap()
    }

    pub async fn next_event(&mut self) -> ArchiveEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("no event within 5s")
            .expect("event channel closed")
    }

    /// 取出并处理下一个后台事件
    pub async fn pump(&mut self) {
        let event = self.next_event().await;
        self.archive.handle_event(event).await;
    }

    pub fn vod(&self, uuid: &str) -> &crate::vod::Vod {
        self.archive.registry.vod(uuid).unwrap()
    }

    /// 走完上线、采集、转封装、定型的完整流程
    pub async fn record(&mut self, login: &str, capture_id: &str, at: DateTime<Utc>) -> String {
        self.archive
            .handle_stream_event(stream_event(StreamEventType::Online, login, capture_id, at))
            .await
            .unwrap();
        let channel_uuid = self.archive.registry.find_channel(login).unwrap().uuid.clone();
        let vod_uuid = self
            .archive
            .registry
            .vod_by_capture_id(&channel_uuid, capture_id)
            .unwrap()
            .uuid
            .clone();

        let job = crate::jobs::capture_job_name(&self.vod(&vod_uuid).basename);
        self.supervisor.finish(&job, true);
        self.pump().await;
        self.pump().await;
        vod_uuid
    }
}
