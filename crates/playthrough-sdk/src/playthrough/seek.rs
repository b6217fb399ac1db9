//! Seek 合并器 - 把一串连续的 seek 输入合并为一次落地、一条日志
//!
//! - 每个 playthrough 一个累加器：burst 开始时的基准位置 + 当前目标
//! - 每次输入都重启防抖定时器（abort 旧任务，spawn 新任务）
//! - 定时器触发时：标记 applying → 指挥播放后端跳转 → 清空累加器 → 释放 applying
//! - 播放后端跳转失败时不记日志；空闲的累加器随即移除
//! - applying 期间到达的输入进入新的累加器，以正在落地的目标为基准
//! - 位移低于阈值只跳转不记日志；否则记一条 seek，并在稳定延迟后发出 SeekCompleted

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SeekConfig;
use crate::events::PlaybackNotification;
use crate::playthrough::recorder::EventRecorder;
use crate::tenant::Tenant;
use crate::transport::PlaybackTransport;
use crate::utils::time::now_millis;

/// seek 输入来源，原样带到每个通知里
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekSource {
    Scrubber,
    Button,
    RemoteControl,
    ChapterSkip,
    Internal,
    Pause,
}

impl SeekSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scrubber => "scrubber",
            Self::Button => "button",
            Self::RemoteControl => "remote_control",
            Self::ChapterSkip => "chapter_skip",
            Self::Internal => "internal",
            Self::Pause => "pause",
        }
    }
}

impl fmt::Display for SeekSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum SeekRequest {
    Absolute(f64),
    Relative(f64),
}

/// 一次 burst 的累加结果
#[derive(Debug, Clone)]
struct PendingSeek {
    tenant: Tenant,
    base: f64,
    /// 未裁剪的净目标，落地时才按 duration 裁剪
    target: f64,
    duration: f64,
    source: SeekSource,
}

#[derive(Default)]
struct SeekSlot {
    pending: Option<PendingSeek>,
    timer: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
    /// 正在落地的目标位置
    applying: Option<f64>,
    generation: u64,
}

impl SeekSlot {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.timer.is_none() && self.settle.is_none() && self.applying.is_none()
    }
}

/// 空闲的 slot 直接移除
fn release_if_idle(slots: &mut HashMap<String, SeekSlot>, playthrough_id: &str) {
    if slots.get(playthrough_id).map_or(false, SeekSlot::is_idle) {
        slots.remove(playthrough_id);
    }
}

struct Inner {
    transport: Arc<dyn PlaybackTransport>,
    recorder: EventRecorder,
    config: SeekConfig,
    slots: Mutex<HashMap<String, SeekSlot>>,
}

/// Seek 合并器
#[derive(Clone)]
pub struct SeekCoordinator {
    inner: Arc<Inner>,
}

/// duration 未知（<= 0 或非有限值）时只限制下界
fn clamp_position(position: f64, duration: f64) -> f64 {
    let lower = position.max(0.0);
    if duration.is_finite() && duration > 0.0 {
        lower.min(duration)
    } else {
        lower
    }
}

impl SeekCoordinator {
    pub fn new(transport: Arc<dyn PlaybackTransport>, recorder: EventRecorder, config: SeekConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                recorder,
                config,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 跳到绝对位置（秒）
    pub async fn seek_to(&self, tenant: &Tenant, playthrough_id: &str, position: f64, source: SeekSource) {
        self.accumulate(tenant, playthrough_id, SeekRequest::Absolute(position), source)
            .await;
    }

    /// 相对跳转；位移按当前倍速放大
    pub async fn seek_relative(&self, tenant: &Tenant, playthrough_id: &str, delta_secs: f64, source: SeekSource) {
        self.accumulate(tenant, playthrough_id, SeekRequest::Relative(delta_secs), source)
            .await;
    }

    /// 立即落地某个 playthrough 的待定 seek（切后台、卸载前调用）
    pub async fn flush(&self, playthrough_id: &str) {
        let timer = {
            let mut slots = self.inner.slots.lock();
            slots.get_mut(playthrough_id).and_then(|slot| slot.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        Inner::apply(self.inner.clone(), playthrough_id.to_string(), None).await;
    }

    pub async fn flush_all(&self) {
        let ids: Vec<String> = {
            let slots = self.inner.slots.lock();
            slots
                .iter()
                .filter(|(_, slot)| slot.pending.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };
        if !ids.is_empty() {
            info!("🔄 立即落地 {} 个待定 seek", ids.len());
        }
        for id in ids {
            self.flush(&id).await;
        }
    }

    pub fn has_pending(&self, playthrough_id: &str) -> bool {
        self.inner
            .slots
            .lock()
            .get(playthrough_id)
            .map_or(false, |slot| slot.pending.is_some())
    }

    /// 当前累加的目标位置（UI 拖动时显示用）
    pub fn pending_target(&self, playthrough_id: &str) -> Option<f64> {
        self.inner
            .slots
            .lock()
            .get(playthrough_id)
            .and_then(|slot| slot.pending.as_ref().map(|p| clamp_position(p.target, p.duration)))
    }

    /// 丢弃某个 playthrough 的所有定时任务与累加器，不落地
    pub fn cancel(&self, playthrough_id: &str) {
        if let Some(slot) = self.inner.slots.lock().remove(playthrough_id) {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
            if let Some(settle) = slot.settle {
                settle.abort();
            }
        }
    }

    async fn accumulate(&self, tenant: &Tenant, playthrough_id: &str, request: SeekRequest, source: SeekSource) {
        let transport = &self.inner.transport;
        let rate = match request {
            SeekRequest::Relative(_) => match transport.get_rate().await {
                Ok(rate) if rate.is_finite() && rate > 0.0 => rate,
                Ok(rate) => {
                    warn!("播放后端返回了非法倍速 {}，按 1.0 处理", rate);
                    1.0
                }
                Err(e) => {
                    warn!("读取倍速失败，按 1.0 处理: {}", e);
                    1.0
                }
            },
            SeekRequest::Absolute(_) => 1.0,
        };
        let progress = match transport.get_progress().await {
            Ok(progress) => Some(progress),
            Err(e) => {
                warn!("读取播放进度失败: {}", e);
                None
            }
        };

        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(playthrough_id.to_string()).or_default();

        let mut pending = match slot.pending.take() {
            Some(pending) => pending,
            None => {
                let Some(progress) = progress else {
                    warn!("playthrough {} 无法确定 seek 基准位置，忽略本次输入", playthrough_id);
                    return;
                };
                let base = slot.applying.unwrap_or(progress.position);
                PendingSeek {
                    tenant: tenant.clone(),
                    base,
                    target: base,
                    duration: progress.duration,
                    source,
                }
            }
        };
        if let Some(progress) = progress {
            pending.duration = progress.duration;
        }

        let raw = match request {
            SeekRequest::Absolute(position) => position,
            SeekRequest::Relative(delta) => pending.target + delta * rate,
        };
        pending.target = raw;
        pending.source = source;
        debug!(
            "seek 累加: playthrough={}, base={}, target={}, source={}",
            playthrough_id, pending.base, pending.target, source
        );
        slot.pending = Some(pending);

        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        if let Some(settle) = slot.settle.take() {
            settle.abort();
        }
        slot.generation += 1;

        let generation = slot.generation;
        let inner = self.inner.clone();
        let id = playthrough_id.to_string();
        let debounce = self.inner.config.debounce();
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            Inner::apply(inner, id, Some(generation)).await;
        }));
    }
}

impl Inner {
    /// 落地一次 burst；`generation` 为 None 表示 flush
    async fn apply(inner: Arc<Inner>, playthrough_id: String, generation: Option<u64>) {
        let (pending, applied, burst) = {
            let mut slots = inner.slots.lock();
            let Some(slot) = slots.get_mut(&playthrough_id) else {
                return;
            };
            if generation.map_or(false, |g| g != slot.generation) {
                return;
            }
            let Some(pending) = slot.pending.take() else {
                return;
            };
            let applied = clamp_position(pending.target, pending.duration);
            slot.timer = None;
            slot.applying = Some(applied);
            (pending, applied, slot.generation)
        };

        let transport_result = inner.transport.seek_to(applied).await;

        {
            let mut slots = inner.slots.lock();
            if let Some(slot) = slots.get_mut(&playthrough_id) {
                slot.applying = None;
            }
            if transport_result.is_err() {
                release_if_idle(&mut slots, &playthrough_id);
            }
        }

        // 播放器没有到达的位置不能写进日志
        if let Err(e) = transport_result {
            warn!(
                "播放后端 seek 到 {} 失败，不记录 seek 事件 (playthrough={}): {}",
                applied, playthrough_id, e
            );
            return;
        }

        let displacement = (applied - pending.base).abs();
        let mut logged = false;
        if displacement >= inner.config.min_logged_displacement_secs {
            match inner
                .recorder
                .record_seek(&pending.tenant, &playthrough_id, pending.base, applied)
                .await
            {
                Ok(()) => logged = true,
                Err(e) => warn!("记录 seek 事件失败（已忽略）: {}", e),
            }
        } else {
            debug!(
                "seek 位移 {:.2}s 低于阈值，不记录事件 (playthrough={})",
                displacement, playthrough_id
            );
        }

        inner
            .recorder
            .events()
            .emit(PlaybackNotification::SeekApplied {
                playthrough_id: playthrough_id.clone(),
                from_position: pending.base,
                to_position: applied,
                source: pending.source,
                logged,
                timestamp: now_millis(),
            })
            .await;

        if !logged {
            release_if_idle(&mut inner.slots.lock(), &playthrough_id);
            return;
        }

        let events = inner.recorder.events().clone();
        let settle = inner.config.settle();
        let id = playthrough_id.clone();
        let weak = Arc::downgrade(&inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            events
                .emit(PlaybackNotification::SeekCompleted {
                    playthrough_id: id.clone(),
                    from_position: pending.base,
                    to_position: applied,
                    source: pending.source,
                    timestamp: now_millis(),
                })
                .await;
            if let Some(inner) = weak.upgrade() {
                let mut slots = inner.slots.lock();
                if let Some(slot) = slots.get_mut(&id) {
                    // 新的 burst 已经接管了 slot
                    if slot.generation == burst {
                        slot.settle = None;
                    }
                }
                release_if_idle(&mut slots, &id);
            }
        });
        if let Some(slot) = inner.slots.lock().get_mut(&playthrough_id) {
            if let Some(previous) = slot.settle.replace(handle) {
                previous.abort();
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().values_mut() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            if let Some(settle) = slot.settle.take() {
                settle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventManager;
    use crate::storage::entities::PlaybackEventType;
    use crate::storage::StorageManager;
    use crate::test_support::{tenant, FakeTransport};
    use std::time::Duration;

    fn coordinator(transport: Arc<FakeTransport>) -> (SeekCoordinator, EventRecorder) {
        let storage = StorageManager::open_in_memory().unwrap();
        let recorder = EventRecorder::new(storage, Arc::new(EventManager::new(64)), "phone");
        let coordinator = SeekCoordinator::new(transport, recorder.clone(), SeekConfig::default());
        (coordinator, recorder)
    }

    async fn seek_events(recorder: &EventRecorder, playthrough_id: &str) -> Vec<(f64, f64)> {
        recorder
            .events_for(&tenant(), playthrough_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == PlaybackEventType::Seek)
            .map(|e| (e.from_position.unwrap(), e.to_position.unwrap()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_relative_seeks_applies_once() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        for _ in 0..3 {
            coordinator.seek_relative(&tenant, "pt-1", 15.0, SeekSource::Button).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(transport.seek_calls().is_empty());
        assert_eq!(coordinator.pending_target("pt-1"), Some(145.0));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.seek_calls(), vec![145.0]);
        assert_eq!(seek_events(&recorder, "pt-1").await, vec![(100.0, 145.0)]);
        assert!(!coordinator.has_pending("pt-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn relative_seek_scales_with_rate() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 2.0));
        let (coordinator, _recorder) = coordinator(transport.clone());

        coordinator.seek_relative(&tenant(), "pt-1", 15.0, SeekSource::Button).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.seek_calls(), vec![130.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn targets_are_clamped_to_duration() {
        let transport = Arc::new(FakeTransport::new(100.0, 200.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        coordinator.seek_to(&tenant, "pt-1", 500.0, SeekSource::Scrubber).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.seek_relative(&tenant, "pt-1", -500.0, SeekSource::Button).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.seek_calls(), vec![200.0, 0.0]);
        assert_eq!(seek_events(&recorder, "pt-1").await, vec![(100.0, 200.0), (200.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn trivial_seek_moves_transport_without_logging() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let mut notifications = recorder.events().subscribe();

        coordinator.seek_to(&tenant(), "pt-1", 101.5, SeekSource::Scrubber).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.seek_calls(), vec![101.5]);
        assert!(seek_events(&recorder, "pt-1").await.is_empty());
        match notifications.try_recv().unwrap() {
            PlaybackNotification::SeekApplied { logged, source, .. } => {
                assert!(!logged);
                assert_eq!(source, SeekSource::Scrubber);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // 没有记录就没有 SeekCompleted
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn seek_completed_follows_settle_delay() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let mut notifications = recorder.events().subscribe();

        coordinator.seek_to(&tenant(), "pt-1", 400.0, SeekSource::ChapterSkip).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut kinds = Vec::new();
        while let Ok(n) = notifications.try_recv() {
            kinds.push(n.event_type());
        }
        assert_eq!(kinds, vec!["event_recorded", "seek_applied"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        match notifications.try_recv().unwrap() {
            PlaybackNotification::SeekCompleted { to_position, source, .. } => {
                assert_eq!(to_position, 400.0);
                assert_eq!(source, SeekSource::ChapterSkip);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flush_applies_without_waiting() {
        let transport = Arc::new(FakeTransport::new(10.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        coordinator.seek_to(&tenant, "pt-1", 60.0, SeekSource::Scrubber).await;
        coordinator.seek_to(&tenant, "pt-2", 90.0, SeekSource::Scrubber).await;
        coordinator.flush_all().await;

        let mut calls = transport.seek_calls();
        calls.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(calls, vec![60.0, 90.0]);
        assert_eq!(seek_events(&recorder, "pt-1").await, vec![(10.0, 60.0)]);

        // 被 abort 的定时器不会再落地一次
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.seek_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn input_during_apply_starts_from_in_flight_target() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        transport.hold_seeks();
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        coordinator.seek_to(&tenant, "pt-1", 150.0, SeekSource::Scrubber).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        // 第一次落地被播放后端挂起
        coordinator.seek_relative(&tenant, "pt-1", 10.0, SeekSource::Button).await;
        assert_eq!(coordinator.pending_target("pt-1"), Some(160.0));

        transport.release_seeks();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.seek_calls(), vec![150.0, 160.0]);
        assert_eq!(
            seek_events(&recorder, "pt-1").await,
            vec![(100.0, 150.0), (150.0, 160.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transport_seek_is_not_logged() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        transport.fail_seeks(true);
        let (coordinator, recorder) = coordinator(transport.clone());
        let mut notifications = recorder.events().subscribe();

        coordinator.seek_to(&tenant(), "pt-1", 300.0, SeekSource::Internal).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(transport.seek_calls(), vec![300.0]);
        assert!(!coordinator.has_pending("pt-1"));
        assert!(seek_events(&recorder, "pt-1").await.is_empty());
        assert!(notifications.try_recv().is_err());
        assert!(coordinator.inner.slots.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_near_the_end_uses_net_displacement() {
        let transport = Arc::new(FakeTransport::new(3_590.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        coordinator.seek_relative(&tenant, "pt-1", 15.0, SeekSource::Button).await;
        assert_eq!(coordinator.pending_target("pt-1"), Some(3_600.0));
        coordinator.seek_relative(&tenant, "pt-1", -15.0, SeekSource::Button).await;
        assert_eq!(coordinator.pending_target("pt-1"), Some(3_590.0));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.seek_calls(), vec![3_590.0]);
        assert!(seek_events(&recorder, "pt-1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slots_are_released_once_idle() {
        let transport = Arc::new(FakeTransport::new(100.0, 3_600.0, 1.0));
        let (coordinator, recorder) = coordinator(transport.clone());
        let tenant = tenant();

        coordinator.seek_to(&tenant, "pt-1", 100.5, SeekSource::Scrubber).await;
        coordinator.seek_to(&tenant, "pt-2", 900.0, SeekSource::Scrubber).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        // pt-1 位移太小，落地后即释放；pt-2 还在等 SeekCompleted
        assert_eq!(
            coordinator.inner.slots.lock().keys().cloned().collect::<Vec<_>>(),
            vec!["pt-2".to_string()]
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(coordinator.inner.slots.lock().is_empty());
        assert_eq!(seek_events(&recorder, "pt-2").await, vec![(100.0, 900.0)]);
    }
}
