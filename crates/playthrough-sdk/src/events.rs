//! 事件系统模块 - 向 UI / 宿主应用广播播放进度相关通知
//!
//! 功能包括：
//! - seek 落地 / 稳定通知
//! - playthrough 重建成功 / 失败通知
//! - 同步完成 / 失败通知
//! - 事件广播（broadcast）与按类型注册的监听器

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::playthrough::seek::SeekSource;
use crate::storage::entities::{PlaybackEventType, PlaythroughStatus};
use crate::utils::time::now_millis;

/// SDK 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlaybackNotification {
    /// 播放后端已跳到目标位置（不论是否记录了 seek 事件）
    SeekApplied {
        playthrough_id: String,
        from_position: f64,
        to_position: f64,
        source: SeekSource,
        /// 位移低于阈值时为 false
        logged: bool,
        timestamp: i64,
    },
    /// 记录了 seek 事件，并且经过稳定延迟后没有新的 seek
    SeekCompleted {
        playthrough_id: String,
        from_position: f64,
        to_position: f64,
        source: SeekSource,
        timestamp: i64,
    },
    /// 本地追加了一条事件
    EventRecorded {
        playthrough_id: String,
        event_type: PlaybackEventType,
        timestamp: i64,
    },
    /// 权威行已重建
    PlaythroughRebuilt {
        playthrough_id: String,
        status: PlaythroughStatus,
        position: f64,
        timestamp: i64,
    },
    /// 重建失败，上一次的权威行保持不变
    RebuildFailed {
        playthrough_id: String,
        error: String,
        /// 缺少 start 等事件时为 true：等待下一次同步补齐后重试
        deferred: bool,
        timestamp: i64,
    },
    /// 一次同步完成
    SyncCompleted {
        tenant_key: String,
        pushed_events: usize,
        pulled_playthroughs: usize,
        pulled_events: usize,
        deletions: usize,
        cursor: i64,
        timestamp: i64,
    },
    /// 一次同步失败，游标未推进
    SyncFailed {
        tenant_key: String,
        error: String,
        retryable: bool,
        timestamp: i64,
    },
}

impl PlaybackNotification {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            PlaybackNotification::SeekApplied { .. } => "seek_applied",
            PlaybackNotification::SeekCompleted { .. } => "seek_completed",
            PlaybackNotification::EventRecorded { .. } => "event_recorded",
            PlaybackNotification::PlaythroughRebuilt { .. } => "playthrough_rebuilt",
            PlaybackNotification::RebuildFailed { .. } => "rebuild_failed",
            PlaybackNotification::SyncCompleted { .. } => "sync_completed",
            PlaybackNotification::SyncFailed { .. } => "sync_failed",
        }
    }

    /// 获取事件关联的 playthrough（同步类事件没有）
    pub fn playthrough_id(&self) -> Option<&str> {
        match self {
            PlaybackNotification::SeekApplied { playthrough_id, .. }
            | PlaybackNotification::SeekCompleted { playthrough_id, .. }
            | PlaybackNotification::EventRecorded { playthrough_id, .. }
            | PlaybackNotification::PlaythroughRebuilt { playthrough_id, .. }
            | PlaybackNotification::RebuildFailed { playthrough_id, .. } => Some(playthrough_id),
            PlaybackNotification::SyncCompleted { .. } | PlaybackNotification::SyncFailed { .. } => None,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> i64 {
        match self {
            PlaybackNotification::SeekApplied { timestamp, .. }
            | PlaybackNotification::SeekCompleted { timestamp, .. }
            | PlaybackNotification::EventRecorded { timestamp, .. }
            | PlaybackNotification::PlaythroughRebuilt { timestamp, .. }
            | PlaybackNotification::RebuildFailed { timestamp, .. }
            | PlaybackNotification::SyncCompleted { timestamp, .. }
            | PlaybackNotification::SyncFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Option<Vec<String>>,
    pub playthrough_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_playthrough_ids(mut self, playthrough_ids: Vec<String>) -> Self {
        self.playthrough_ids = Some(playthrough_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &PlaybackNotification) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref ids) = self.playthrough_ids {
            match event.playthrough_id() {
                Some(id) => {
                    if !ids.iter().any(|i| i == id) {
                        return false;
                    }
                }
                None => return false, // 事件没有 playthrough 但过滤器要求有
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&PlaybackNotification) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<i64>,
}

/// 事件管理器
///
/// 监听器按注册顺序同步调用；broadcast 订阅者各自异步消费。
pub struct EventManager {
    sender: broadcast::Sender<PlaybackNotification>,
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: PlaybackNotification) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的宿主），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackNotification> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器；`"*"` 接收所有事件
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&PlaybackNotification) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<PlaybackNotification>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<PlaybackNotification>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<PlaybackNotification, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 非阻塞
    pub fn try_recv(&mut self) -> Result<PlaybackNotification, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;
    use crate::error::PlaythroughError;
    use crate::storage::entities::{PlaybackEvent, Playthrough};

    pub fn event_recorded(event: &PlaybackEvent) -> PlaybackNotification {
        PlaybackNotification::EventRecorded {
            playthrough_id: event.playthrough_id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
        }
    }

    pub fn playthrough_rebuilt(playthrough: &Playthrough) -> PlaybackNotification {
        PlaybackNotification::PlaythroughRebuilt {
            playthrough_id: playthrough.id.clone(),
            status: playthrough.status,
            position: playthrough.position,
            timestamp: now_millis(),
        }
    }

    pub fn rebuild_failed(playthrough_id: &str, error: &PlaythroughError) -> PlaybackNotification {
        PlaybackNotification::RebuildFailed {
            playthrough_id: playthrough_id.to_string(),
            error: error.to_string(),
            deferred: error.is_integrity(),
            timestamp: now_millis(),
        }
    }

    pub fn sync_failed(tenant_key: &str, error: &PlaythroughError) -> PlaybackNotification {
        PlaybackNotification::SyncFailed {
            tenant_key: tenant_key.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
            timestamp: now_millis(),
        }
    }
}
