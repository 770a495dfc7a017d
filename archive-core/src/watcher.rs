//! 轮询式文件监视
//!
//! 每个所有者（VOD UUID）登记一组路径，轮询时比较文件长度与修改时间，
//! 变化以事件形式投递到协调器的队列，由协调器统一处理。
//! 自身写文件期间持有 [`WatchPause`]，释放时重新建立快照，
//! 因此不会观察到自己的写入。

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub owner: String,
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct WatchEntry {
    snapshot: HashMap<PathBuf, Option<FileStamp>>,
    pauses: usize,
}

fn stamp(path: &Path) -> Option<FileStamp> {
    std::fs::metadata(path).ok().map(|m| FileStamp {
        len: m.len(),
        modified: m.modified().ok(),
    })
}

#[derive(Clone)]
pub struct FileWatcher {
    entries: Arc<DashMap<String, WatchEntry>>,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl FileWatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(tx), rx)
    }

    pub fn with_sender(tx: mpsc::UnboundedSender<WatchEvent>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            tx,
        }
    }

    /// 登记（替换）所有者的监视路径
    pub fn watch(&self, owner: &str, paths: impl IntoIterator<Item = PathBuf>) {
        let snapshot: HashMap<PathBuf, Option<FileStamp>> = paths
            .into_iter()
            .map(|p| {
                let s = stamp(&p);
                (p, s)
            })
            .collect();
        debug!("Watching {} paths for {}", snapshot.len(), owner);
        self.entries
            .entry(owner.to_string())
            .or_default()
            .snapshot = snapshot;
    }

    pub fn unwatch(&self, owner: &str) {
        if self.entries.remove(owner).is_some() {
            debug!("Stopped watching {}", owner);
        }
    }

    pub fn is_watching(&self, owner: &str) -> bool {
        self.entries
            .get(owner)
            .map(|e| !e.snapshot.is_empty())
            .unwrap_or(false)
    }

    pub fn is_paused(&self, owner: &str) -> bool {
        self.entries.get(owner).map(|e| e.pauses > 0).unwrap_or(false)
    }

    /// 暂停监视，返回的守卫释放时恢复
    pub fn pause(&self, owner: &str) -> WatchPause {
        self.entries.entry(owner.to_string()).or_default().pauses += 1;
        WatchPause {
            watcher: self.clone(),
            owner: owner.to_string(),
        }
    }

    fn resume(&self, owner: &str) {
        if let Some(mut entry) = self.entries.get_mut(owner) {
            entry.pauses = entry.pauses.saturating_sub(1);
            if entry.pauses == 0 {
                let paths: Vec<PathBuf> = entry.snapshot.keys().cloned().collect();
                for path in paths {
                    let s = stamp(&path);
                    entry.snapshot.insert(path, s);
                }
            }
        }
    }

    /// 扫描一次，返回产生的事件数
    pub fn poll(&self) -> usize {
        let mut events = Vec::new();

        for mut entry in self.entries.iter_mut() {
            if entry.pauses > 0 {
                continue;
            }
            let owner = entry.key().clone();
            for (path, previous) in entry.value_mut().snapshot.iter_mut() {
                let current = stamp(path);
                let kind = match (*previous, current) {
                    (None, Some(_)) => Some(WatchEventKind::Created),
                    (Some(_), None) => Some(WatchEventKind::Removed),
                    (Some(a), Some(b)) if a != b => Some(WatchEventKind::Modified),
                    _ => None,
                };
                if let Some(kind) = kind {
                    events.push(WatchEvent {
                        owner: owner.clone(),
                        path: path.clone(),
                        kind,
                    });
                }
                *previous = current;
            }
        }

        let count = events.len();
        for event in events {
            debug!("File {:?} {:?} ({})", event.path, event.kind, event.owner);
            let _ = self.tx.send(event);
        }
        count
    }

    /// 周期性轮询任务
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!("File watcher polling every {:?}", interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll();
                    }
                }
            }
            info!("File watcher stopped");
        })
    }
}

/// 暂停守卫
pub struct WatchPause {
    watcher: FileWatcher,
    owner: String,
}

impl Drop for WatchPause {
    fn drop(&mut self) {
        self.watcher.resume(&self.owner);
    }
}
