//! 同步调度器 - 每个租户一个后台循环
//!
//! 启动后立即同步一次，之后按周期同步；`trigger` / 回到前台会提前唤醒。
//! 可重试的失败按 `RetryPolicy` 退避，连续失败超过上限后回到常规周期。
//! 停止时正在进行的一轮直接放弃：本地写入只发生在单个事务里，放弃的一轮不会推进游标。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncOutcome};
use super::retry_policy::RetryPolicy;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::lifecycle::LifecycleHook;
use crate::tenant::Tenant;

struct TenantLoop {
    tenant: Tenant,
    trigger: Arc<Notify>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    config: SyncConfig,
    loops: Mutex<HashMap<String, TenantLoop>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, config: SyncConfig) -> Self {
        Self {
            engine,
            config,
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// 为租户启动后台同步；已启动时什么都不做
    pub fn start(&self, tenant: &Tenant) {
        let mut loops = self.loops.lock();
        let key = tenant.key();
        if loops.contains_key(&key) {
            debug!("租户 {} 的同步循环已在运行", tenant);
            return;
        }

        let trigger = Arc::new(Notify::new());
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_sync_loop(
            self.engine.clone(),
            tenant.clone(),
            self.config.interval(),
            self.config.retry.clone(),
            trigger.clone(),
            token.clone(),
        ));
        info!("⏰ 同步调度已启动: tenant={}, interval={:?}", tenant, self.config.interval());
        loops.insert(
            key,
            TenantLoop {
                tenant: tenant.clone(),
                trigger,
                token,
                handle,
            },
        );
    }

    pub fn is_running(&self, tenant: &Tenant) -> bool {
        self.loops.lock().contains_key(&tenant.key())
    }

    /// 提前唤醒租户的同步循环；循环正在同步时，本轮结束后立即再跑一轮
    pub fn trigger(&self, tenant: &Tenant) -> bool {
        match self.loops.lock().get(&tenant.key()) {
            Some(l) => {
                l.trigger.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn trigger_all(&self) {
        let loops = self.loops.lock();
        for l in loops.values() {
            l.trigger.notify_one();
        }
        debug!("已唤醒 {} 个租户的同步循环", loops.len());
    }

    /// 立即在当前任务里同步一次，不经过后台循环
    pub async fn sync_now(&self, tenant: &Tenant) -> Result<SyncOutcome> {
        self.engine.sync(tenant).await
    }

    /// 停止单个租户的后台同步
    pub async fn stop(&self, tenant: &Tenant) {
        let removed = self.loops.lock().remove(&tenant.key());
        if let Some(l) = removed {
            l.token.cancel();
            if let Err(e) = l.handle.await {
                warn!("同步循环退出异常: tenant={}, error={}", l.tenant, e);
            }
            info!("同步调度已停止: tenant={}", l.tenant);
        }
    }

    /// 停止所有后台同步；正在进行的一轮被放弃
    pub async fn shutdown(&self) {
        let loops: Vec<TenantLoop> = self.loops.lock().drain().map(|(_, l)| l).collect();
        for l in &loops {
            l.token.cancel();
        }
        for l in loops {
            if let Err(e) = l.handle.await {
                warn!("同步循环退出异常: tenant={}, error={}", l.tenant, e);
            }
        }
        info!("🛑 同步调度已全部停止");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        for (_, l) in self.loops.lock().drain() {
            l.token.cancel();
            l.handle.abort();
        }
    }
}

#[async_trait]
impl LifecycleHook for SyncScheduler {
    async fn on_background(&self) -> Result<()> {
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        self.trigger_all();
        Ok(())
    }
}

async fn run_sync_loop(
    engine: Arc<SyncEngine>,
    tenant: Tenant,
    interval: Duration,
    retry: RetryPolicy,
    trigger: Arc<Notify>,
    token: CancellationToken,
) {
    let mut failures: u32 = 0;
    loop {
        if token.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            _ = token.cancelled() => {
                debug!("放弃进行中的同步: tenant={}", tenant);
                break;
            }
            result = engine.sync(&tenant) => result,
        };

        let wait = match result {
            Ok(_) => {
                failures = 0;
                interval
            }
            Err(e) => match retry.next_delay(failures, &e) {
                Some(delay) => {
                    failures += 1;
                    debug!("同步将在 {:?} 后重试 (第 {} 次): tenant={}", delay, failures, tenant);
                    delay
                }
                None => interval,
            },
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = trigger.notified() => debug!("同步被提前唤醒: tenant={}", tenant),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
