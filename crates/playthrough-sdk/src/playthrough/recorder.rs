//! 事件记录器 - 本地事件写入的唯一入口
//!
//! - 位置/倍速类事件：追加事件 + 刷新 state cache，同一事务
//! - 状态迁移类事件：追加事件 + 重建权威行，同一事务；重建失败不回滚事件

use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PlaythroughError, Result};
use crate::events::{event_builders, EventManager};
use crate::playthrough::reducer::{self, rebuild_in_savepoint};
use crate::storage::entities::{PlaybackEvent, PlaybackEventType, Playthrough};
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;
use crate::utils::time::now_millis;

#[derive(Debug, Clone)]
pub struct EventRecorder {
    storage: StorageManager,
    events: Arc<EventManager>,
    device_id: String,
}

impl EventRecorder {
    pub fn new(storage: StorageManager, events: Arc<EventManager>, device_id: impl Into<String>) -> Self {
        Self {
            storage,
            events,
            device_id: device_id.into(),
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 以本设备身份、当前时间构造事件
    pub fn new_event(&self, playthrough_id: &str, event_type: PlaybackEventType) -> PlaybackEvent {
        PlaybackEvent::new(playthrough_id, event_type, now_millis(), self.device_id.as_str())
    }

    /// 追加一条事件
    ///
    /// 状态迁移类事件会在同一事务里重建权威行并返回；其余返回 None。
    pub async fn record(&self, tenant: &Tenant, event: PlaybackEvent) -> Result<Option<Playthrough>> {
        let rebuilt = self
            .storage
            .with_transaction(|tx| {
                DaoFactory::playback_event_dao(tx, tenant)
                    .insert(&event)
                    .map_err(|e| PlaythroughError::Recording(format!("写入事件 {} 失败: {}", event.id, e)))?;

                if event.event_type.touches_state_cache() {
                    touch_cache_for(tx, tenant, &event)?;
                }

                if event.event_type.is_lifecycle() {
                    Ok(Some(rebuild_in_savepoint(tx, tenant, &event.playthrough_id, now_millis())))
                } else {
                    Ok(None)
                }
            })
            .await?;

        debug!(
            "📝 记录事件: {} {} (playthrough={})",
            event.event_type, event.id, event.playthrough_id
        );
        self.events.emit(event_builders::event_recorded(&event)).await;

        match rebuilt {
            None => Ok(None),
            Some(Ok(playthrough)) => {
                self.events.emit(event_builders::playthrough_rebuilt(&playthrough)).await;
                Ok(Some(playthrough))
            }
            Some(Err(e)) => {
                // 事件已落盘，派生行等待后续事件（通常是同步拉到的 start）补齐
                warn!("事件已记录，但重建 playthrough {} 失败: {}", event.playthrough_id, e);
                self.events
                    .emit(event_builders::rebuild_failed(&event.playthrough_id, &e))
                    .await;
                Ok(None)
            }
        }
    }

    /// 开始一次新的收听，返回新建的权威行
    pub async fn start_playthrough(
        &self,
        tenant: &Tenant,
        media_id: &str,
        position: f64,
        rate: f64,
    ) -> Result<Playthrough> {
        let playthrough_id = uuid::Uuid::new_v4().to_string();
        let event = self
            .new_event(&playthrough_id, PlaybackEventType::Start)
            .with_media(media_id)
            .with_position(position)
            .with_rate(rate, None);
        self.record(tenant, event).await?.ok_or_else(|| {
            PlaythroughError::Recording(format!("playthrough {} 创建后未能重建", playthrough_id))
        })
    }

    pub async fn record_play(&self, tenant: &Tenant, playthrough_id: &str, position: f64) -> Result<()> {
        let event = self.new_event(playthrough_id, PlaybackEventType::Play).with_position(position);
        self.record(tenant, event).await.map(|_| ())
    }

    pub async fn record_pause(&self, tenant: &Tenant, playthrough_id: &str, position: f64) -> Result<()> {
        let event = self.new_event(playthrough_id, PlaybackEventType::Pause).with_position(position);
        self.record(tenant, event).await.map(|_| ())
    }

    pub async fn record_seek(&self, tenant: &Tenant, playthrough_id: &str, from: f64, to: f64) -> Result<()> {
        let event = self.new_event(playthrough_id, PlaybackEventType::Seek).with_seek(from, to);
        self.record(tenant, event).await.map(|_| ())
    }

    pub async fn record_rate_change(
        &self,
        tenant: &Tenant,
        playthrough_id: &str,
        rate: f64,
        previous_rate: Option<f64>,
        position: Option<f64>,
    ) -> Result<()> {
        let mut event = self
            .new_event(playthrough_id, PlaybackEventType::RateChange)
            .with_rate(rate, previous_rate);
        event.position = position;
        self.record(tenant, event).await.map(|_| ())
    }

    /// finish / abandon / delete / resume
    pub async fn record_transition(
        &self,
        tenant: &Tenant,
        playthrough_id: &str,
        event_type: PlaybackEventType,
    ) -> Result<Option<Playthrough>> {
        if !event_type.is_lifecycle() || event_type == PlaybackEventType::Start {
            return Err(PlaythroughError::InvalidArgument(format!(
                "{} 不是状态迁移事件",
                event_type
            )));
        }
        let event = self.new_event(playthrough_id, event_type);
        self.record(tenant, event).await
    }

    /// 按需重建并广播结果
    pub async fn rebuild(&self, tenant: &Tenant, playthrough_id: &str) -> Result<Playthrough> {
        match reducer::rebuild(&self.storage, tenant, playthrough_id).await {
            Ok(playthrough) => {
                self.events.emit(event_builders::playthrough_rebuilt(&playthrough)).await;
                Ok(playthrough)
            }
            Err(e) => {
                if e.is_integrity() {
                    self.events.emit(event_builders::rebuild_failed(playthrough_id, &e)).await;
                }
                Err(e)
            }
        }
    }

    /// 某个 playthrough 的完整事件序列
    pub async fn events_for(&self, tenant: &Tenant, playthrough_id: &str) -> Result<Vec<PlaybackEvent>> {
        self.storage
            .with_connection(|conn| DaoFactory::playback_event_dao(conn, tenant).list_for_playthrough(playthrough_id))
            .await
    }

    /// 时间窗口内（闭区间）的所有事件
    pub async fn events_between(&self, tenant: &Tenant, from_ts: i64, to_ts: i64) -> Result<Vec<PlaybackEvent>> {
        self.storage
            .with_connection(|conn| DaoFactory::playback_event_dao(conn, tenant).list_between(from_ts, to_ts))
            .await
    }
}

/// 用事件里的位置/倍速刷新 cache；事件缺的那一半沿用 cache 或权威行里的值
fn touch_cache_for(conn: &Connection, tenant: &Tenant, event: &PlaybackEvent) -> Result<()> {
    let cache_dao = DaoFactory::state_cache_dao(conn, tenant);
    let previous = cache_dao.get(&event.playthrough_id)?;
    let row = match previous {
        Some(_) => None,
        None => DaoFactory::playthrough_dao(conn, tenant).get(&event.playthrough_id)?,
    };

    let position = event
        .to_position
        .or(event.position)
        .or(previous.as_ref().map(|c| c.current_position))
        .or(row.as_ref().map(|p| p.position));
    let rate = event
        .playback_rate
        .or(previous.as_ref().map(|c| c.current_rate))
        .or(row.as_ref().map(|p| p.playback_rate))
        .unwrap_or(1.0);

    match position {
        Some(position) => cache_dao.touch(&event.playthrough_id, position, rate, event.timestamp),
        None => {
            debug!("事件 {} 没有可用位置，跳过 cache 刷新", event.id);
            Ok(())
        }
    }
}
