//! 播放心跳 - 播放期间按固定间隔把当前位置写进 state cache
//!
//! `stop()` 是同步的：取消 token 后，任何尚未拿到存储锁的 tick 都不会再写入；
//! 已经持锁的 tick 在后续的状态迁移写入之前完成。

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;
use crate::transport::PlaybackTransport;
use crate::utils::time::now_millis;

struct Running {
    playthrough_id: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ProgressHeartbeat {
    storage: StorageManager,
    transport: Arc<dyn PlaybackTransport>,
    config: HeartbeatConfig,
    running: Mutex<Option<Running>>,
}

impl ProgressHeartbeat {
    pub fn new(storage: StorageManager, transport: Arc<dyn PlaybackTransport>, config: HeartbeatConfig) -> Self {
        Self {
            storage,
            transport,
            config,
            running: Mutex::new(None),
        }
    }

    /// 开始心跳；已有心跳时先停掉旧的
    pub fn start(&self, tenant: &Tenant, playthrough_id: &str) {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            previous.token.cancel();
            previous.handle.abort();
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            self.storage.clone(),
            self.transport.clone(),
            tenant.clone(),
            playthrough_id.to_string(),
            self.config.interval(),
            token.clone(),
        ));
        info!("💓 心跳启动: playthrough={}, interval={:?}", playthrough_id, self.config.interval());
        *running = Some(Running {
            playthrough_id: playthrough_id.to_string(),
            token,
            handle,
        });
    }

    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.token.cancel();
            running.handle.abort();
            info!("心跳停止: playthrough={}", running.playthrough_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn current_playthrough(&self) -> Option<String> {
        self.running.lock().as_ref().map(|r| r.playthrough_id.clone())
    }
}

impl Drop for ProgressHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_heartbeat(
    storage: StorageManager,
    transport: Arc<dyn PlaybackTransport>,
    tenant: Tenant,
    playthrough_id: String,
    interval: std::time::Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // 第一次 tick 立即返回，跳过
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let progress = match transport.get_progress().await {
            Ok(progress) => progress,
            Err(e) => {
                warn!("心跳读取播放进度失败: {}", e);
                continue;
            }
        };
        let rate = match transport.get_rate().await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("心跳读取倍速失败: {}", e);
                continue;
            }
        };

        let conn = storage.lock().await;
        if token.is_cancelled() {
            break;
        }
        match DaoFactory::state_cache_dao(&conn, &tenant).touch(&playthrough_id, progress.position, rate, now_millis()) {
            Ok(()) => debug!("💓 心跳写入: playthrough={}, position={:.1}", playthrough_id, progress.position),
            Err(e) => warn!("心跳写入 state cache 失败: {}", e),
        }
    }
}
