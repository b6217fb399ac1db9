//! 播放会话 - 把播放后端的事件翻译成事件日志
//!
//! - Started → play + 启动心跳
//! - Paused → 停心跳 + 落地待定 seek + pause + 重建
//! - QueueEnded → 停心跳 + 落地待定 seek + finish
//! - RateChanged → rate_change（带上一次倍速）
//! - SeekCompleted → 忽略，seek 由 SeekCoordinator 记录

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PlaythroughConfig;
use crate::playthrough::heartbeat::ProgressHeartbeat;
use crate::playthrough::recorder::EventRecorder;
use crate::playthrough::seek::{SeekCoordinator, SeekSource};
use crate::playthrough::state_cache::display_state;
use crate::storage::entities::PlaybackEventType;
use crate::tenant::Tenant;
use crate::transport::{PlaybackTransport, TransportEvent};

pub struct PlaybackSession {
    tenant: Tenant,
    playthrough_id: String,
    transport: Arc<dyn PlaybackTransport>,
    recorder: EventRecorder,
    heartbeat: ProgressHeartbeat,
    seek: SeekCoordinator,
    last_rate: Mutex<Option<f64>>,
}

impl PlaybackSession {
    pub fn new(
        tenant: Tenant,
        playthrough_id: impl Into<String>,
        transport: Arc<dyn PlaybackTransport>,
        recorder: EventRecorder,
        config: &PlaythroughConfig,
    ) -> Self {
        let heartbeat = ProgressHeartbeat::new(recorder.storage().clone(), transport.clone(), config.heartbeat.clone());
        let seek = SeekCoordinator::new(transport.clone(), recorder.clone(), config.seek.clone());
        Self {
            tenant,
            playthrough_id: playthrough_id.into(),
            transport,
            recorder,
            heartbeat,
            seek,
            last_rate: Mutex::new(None),
        }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn playthrough_id(&self) -> &str {
        &self.playthrough_id
    }

    pub fn seek_coordinator(&self) -> &SeekCoordinator {
        &self.seek
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    pub async fn seek_to(&self, position: f64, source: SeekSource) {
        self.seek.seek_to(&self.tenant, &self.playthrough_id, position, source).await;
    }

    pub async fn seek_relative(&self, delta_secs: f64, source: SeekSource) {
        self.seek
            .seek_relative(&self.tenant, &self.playthrough_id, delta_secs, source)
            .await;
    }

    /// 指挥播放后端改倍速；日志在收到 RateChanged 时写
    pub async fn set_rate(&self, rate: f64) {
        if let Err(e) = self.transport.set_rate(rate).await {
            warn!("播放后端设置倍速 {} 失败: {}", rate, e);
        }
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        debug!("播放后端事件: {:?} (playthrough={})", event, self.playthrough_id);
        match event {
            TransportEvent::Started => {
                if let Some(position) = self.current_position().await {
                    if let Err(e) = self.recorder.record_play(&self.tenant, &self.playthrough_id, position).await {
                        warn!("记录 play 失败（已忽略）: {}", e);
                    }
                }
                self.heartbeat.start(&self.tenant, &self.playthrough_id);
            }
            TransportEvent::Paused => {
                self.heartbeat.stop();
                self.seek.flush(&self.playthrough_id).await;
                if let Some(position) = self.current_position().await {
                    if let Err(e) = self.recorder.record_pause(&self.tenant, &self.playthrough_id, position).await {
                        warn!("记录 pause 失败（已忽略）: {}", e);
                    }
                }
                if let Err(e) = self.recorder.rebuild(&self.tenant, &self.playthrough_id).await {
                    warn!("暂停后重建 playthrough {} 失败: {}", self.playthrough_id, e);
                }
            }
            TransportEvent::QueueEnded => {
                self.heartbeat.stop();
                self.seek.flush(&self.playthrough_id).await;
                match self
                    .recorder
                    .record_transition(&self.tenant, &self.playthrough_id, PlaybackEventType::Finish)
                    .await
                {
                    Ok(_) => info!("✅ playthrough {} 播放完毕", self.playthrough_id),
                    Err(e) => warn!("记录 finish 失败（已忽略）: {}", e),
                }
            }
            TransportEvent::RateChanged(rate) => {
                let previous = self.previous_rate().await;
                let position = self.current_position().await;
                match self
                    .recorder
                    .record_rate_change(&self.tenant, &self.playthrough_id, rate, previous, position)
                    .await
                {
                    Ok(()) => *self.last_rate.lock() = Some(rate),
                    Err(e) => warn!("记录 rate_change 失败（已忽略）: {}", e),
                }
            }
            TransportEvent::SeekCompleted => {}
        }
    }

    /// 卸载前调用：落地待定 seek 并停止心跳
    pub async fn unload(&self) {
        self.heartbeat.stop();
        self.seek.flush(&self.playthrough_id).await;
    }

    async fn current_position(&self) -> Option<f64> {
        match self.transport.get_progress().await {
            Ok(progress) => Some(progress.position),
            Err(e) => {
                warn!("读取播放进度失败: {}", e);
                None
            }
        }
    }

    async fn previous_rate(&self) -> Option<f64> {
        let cached = *self.last_rate.lock();
        if cached.is_some() {
            return cached;
        }
        match display_state(self.recorder.storage(), &self.tenant, &self.playthrough_id).await {
            Ok(state) => state.map(|s| s.playback_rate),
            Err(e) => {
                warn!("读取当前倍速失败: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::storage::entities::PlaythroughStatus;
    use crate::storage::{DaoFactory, StorageManager};
    use crate::test_support::{tenant, FakeTransport};
    use std::time::Duration;

    async fn session(transport: Arc<FakeTransport>) -> PlaybackSession {
        let storage = StorageManager::open_in_memory().unwrap();
        let recorder = EventRecorder::new(storage, Arc::new(EventManager::new(64)), "phone");
        let started = recorder.start_playthrough(&tenant(), "book-1", 0.0, 1.0).await.unwrap();
        let config = PlaythroughConfig::builder().device_id("phone").build();
        PlaybackSession::new(tenant(), started.id, transport, recorder, &config)
    }

    async fn event_types(session: &PlaybackSession) -> Vec<PlaybackEventType> {
        session
            .recorder
            .events_for(session.tenant(), session.playthrough_id())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn play_pause_cycle() {
        let transport = Arc::new(FakeTransport::new(0.0, 3_600.0, 1.0));
        let session = session(transport.clone()).await;

        session.handle_transport_event(TransportEvent::Started).await;
        assert!(session.is_heartbeat_running());

        transport.set_position(42.0);
        session.handle_transport_event(TransportEvent::Paused).await;
        assert!(!session.is_heartbeat_running());

        assert_eq!(
            event_types(&session).await,
            vec![PlaybackEventType::Start, PlaybackEventType::Play, PlaybackEventType::Pause]
        );
        let row = session
            .recorder
            .storage()
            .with_connection(|conn| DaoFactory::playthrough_dao(conn, session.tenant()).get(session.playthrough_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.position, 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_flushes_pending_seek_first() {
        let transport = Arc::new(FakeTransport::new(10.0, 3_600.0, 1.0));
        let session = session(transport.clone()).await;

        session.seek_to(500.0, SeekSource::Scrubber).await;
        session.handle_transport_event(TransportEvent::Paused).await;

        assert_eq!(transport.seek_calls(), vec![500.0]);
        assert_eq!(
            event_types(&session).await,
            vec![PlaybackEventType::Start, PlaybackEventType::Seek, PlaybackEventType::Pause]
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.seek_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_end_finishes_playthrough() {
        let transport = Arc::new(FakeTransport::new(3_599.0, 3_600.0, 1.0));
        let session = session(transport).await;

        session.handle_transport_event(TransportEvent::Started).await;
        session.handle_transport_event(TransportEvent::QueueEnded).await;
        assert!(!session.is_heartbeat_running());

        let state = display_state(session.recorder.storage(), session.tenant(), session.playthrough_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, PlaythroughStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_change_carries_previous_rate() {
        let transport = Arc::new(FakeTransport::new(10.0, 3_600.0, 1.0));
        let session = session(transport).await;

        session.handle_transport_event(TransportEvent::RateChanged(1.5)).await;
        session.handle_transport_event(TransportEvent::RateChanged(2.0)).await;

        let rates: Vec<_> = session
            .recorder
            .events_for(session.tenant(), session.playthrough_id())
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == PlaybackEventType::RateChange)
            .map(|e| (e.playback_rate, e.previous_rate))
            .collect();
        assert_eq!(rates, vec![(Some(1.5), Some(1.0)), (Some(2.0), Some(1.5))]);
    }
}
