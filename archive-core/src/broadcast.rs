use common::BroadcastMessage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// 对外广播接口，不等待确认
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: &str, payload: serde_json::Value);
}

/// 基于 tokio broadcast 的分发器
pub struct ChannelDispatcher {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl ChannelDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, event: &str, payload: serde_json::Value) {
        let message = BroadcastMessage {
            event: event.to_string(),
            payload,
        };
        // 没有订阅者时发送失败，忽略
        if self.sender.send(message).is_err() {
            trace!("No subscribers for {}", event);
        }
    }
}

/// 防抖广播调度器
///
/// 每个实体一个待发任务，新的调度会取消旧任务并重新计时。
#[derive(Clone)]
pub struct Broadcaster {
    pending: Arc<DashMap<String, (u64, AbortHandle)>>,
    generation: Arc<AtomicU64>,
    dispatcher: Arc<dyn Dispatcher>,
    delay: Duration,
}

impl Broadcaster {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, delay: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            dispatcher,
            delay,
        }
    }

    /// 调度一次广播，覆盖该实体尚未发出的广播
    pub fn schedule(&self, key: &str, event: &str, payload: serde_json::Value) {
        if tokio::runtime::Handle::try_current().is_err() {
            self.dispatcher.dispatch(event, payload);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let dispatcher = self.dispatcher.clone();
        let delay = self.delay;
        let task_key = key.to_string();
        let event = event.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove_if(&task_key, |_, (g, _)| *g == generation);
            debug!("Dispatching {} for {}", event, task_key);
            dispatcher.dispatch(&event, payload);
        })
        .abort_handle();

        if let Some((_, old)) = self.pending.insert(key.to_string(), (generation, handle)) {
            old.abort();
        }
    }

    /// 取消尚未发出的广播
    pub fn cancel(&self, key: &str) {
        if let Some((_, (_, handle))) = self.pending.remove(key) {
            handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
