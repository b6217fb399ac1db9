//! 同步引擎 - 单个租户的一轮完整同步
//!
//! 顺序：
//! 0. 推送本地未同步事件，按远端确认时间标记 synced_at
//! 1. 读取游标（无游标 = 全量）
//! 2. 拉取游标之后的变更
//! 3. 一个事务内：upsert → tombstone → 推进游标
//! 4. 重建受影响的 playthrough
//!
//! 提交之前任何一步失败，游标保持不变。同一租户同时只跑一轮。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::applier::{apply_response, ApplyOutcome};
use super::cursor_store::SyncCursorStore;
use super::remote::RemoteAuthority;
use crate::error::{PlaythroughError, Result};
use crate::events::{event_builders, EventManager, PlaybackNotification};
use crate::playthrough::reducer::{rebuild_many, RebuildReport};
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;
use crate::utils::time::{format_iso8601, now_millis};

/// 一轮同步的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub pushed_events: usize,
    pub pulled_playthroughs: usize,
    pub pulled_events: usize,
    pub deletions: usize,
    pub cursor: i64,
    pub rebuilt: Vec<String>,
    /// 因缺少 start 等事件而推迟到下一次同步的 playthrough
    pub deferred: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// 同一租户已有一轮同步在进行
    Skipped,
}

struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, key: String) -> Option<Self> {
        if in_flight.lock().insert(key.clone()) {
            Some(Self { in_flight, key })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

pub struct SyncEngine {
    storage: StorageManager,
    remote: Arc<dyn RemoteAuthority>,
    events: Arc<EventManager>,
    cursor_store: SyncCursorStore,
    push_batch_size: u32,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(
        storage: StorageManager,
        remote: Arc<dyn RemoteAuthority>,
        events: Arc<EventManager>,
        push_batch_size: u32,
    ) -> Self {
        Self {
            cursor_store: SyncCursorStore::new(storage.clone()),
            storage,
            remote,
            events,
            push_batch_size: push_batch_size.max(1),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn cursor_store(&self) -> &SyncCursorStore {
        &self.cursor_store
    }

    pub fn is_syncing(&self, tenant: &Tenant) -> bool {
        self.in_flight.lock().contains(&tenant.key())
    }

    /// 执行一轮同步
    ///
    /// 失败时已发出 `SyncFailed` 通知并返回错误，游标未推进。
    pub async fn sync(&self, tenant: &Tenant) -> Result<SyncOutcome> {
        let tenant_key = tenant.key();
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, tenant_key.clone()) else {
            debug!("租户 {} 已有同步在进行，本次跳过", tenant);
            return Ok(SyncOutcome::Skipped);
        };

        info!("🔄 开始同步: tenant={}", tenant);
        match self.run(tenant).await {
            Ok(report) => {
                info!(
                    "✅ 同步完成: tenant={}, pushed={}, playthroughs={}, events={}, deletions={}, cursor={} ({})",
                    tenant,
                    report.pushed_events,
                    report.pulled_playthroughs,
                    report.pulled_events,
                    report.deletions,
                    report.cursor,
                    format_iso8601(report.cursor)
                );
                self.events
                    .emit(PlaybackNotification::SyncCompleted {
                        tenant_key,
                        pushed_events: report.pushed_events,
                        pulled_playthroughs: report.pulled_playthroughs,
                        pulled_events: report.pulled_events,
                        deletions: report.deletions,
                        cursor: report.cursor,
                        timestamp: now_millis(),
                    })
                    .await;
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("同步失败（可重试）: tenant={}, error={}", tenant, e);
                } else {
                    error!("❌ 同步失败: tenant={}, error={}", tenant, e);
                }
                self.events.emit(event_builders::sync_failed(&tenant_key, &e)).await;
                Err(e)
            }
        }
    }

    /// 清空游标后做一次全量同步
    pub async fn full_resync(&self, tenant: &Tenant) -> Result<SyncOutcome> {
        if self.is_syncing(tenant) {
            return Ok(SyncOutcome::Skipped);
        }
        self.cursor_store.reset(tenant).await?;
        self.sync(tenant).await
    }

    async fn run(&self, tenant: &Tenant) -> Result<SyncReport> {
        let pushed_events = self.push_pending(tenant).await?;

        let since = self.cursor_store.get(tenant).await?;
        let response = self.remote.fetch_changes(tenant, since).await?;
        debug!(
            "拉取到 {} 个 playthrough、{} 条事件、{} 条删除 (since={:?}, serverTime={})",
            response.playthroughs.len(),
            response.playback_events.len(),
            response.deletions.len(),
            since,
            response.server_time
        );

        let outcome: ApplyOutcome = self
            .storage
            .with_transaction(|tx| apply_response(tx, tenant, &response))
            .await?;

        let to_rebuild = outcome.playthroughs_to_rebuild();
        let rebuild_report = rebuild_many(&self.storage, tenant, &to_rebuild).await?;
        let (rebuilt, deferred) = self.notify_rebuilds(&rebuild_report).await;

        Ok(SyncReport {
            pushed_events,
            pulled_playthroughs: outcome.playthroughs_upserted,
            pulled_events: outcome.events_inserted,
            deletions: outcome.deletions_applied,
            cursor: outcome.cursor,
            rebuilt,
            deferred,
        })
    }

    /// 分批推送未同步事件；任何一批失败立即返回，已确认的批次保持 synced
    async fn push_pending(&self, tenant: &Tenant) -> Result<usize> {
        let mut pushed = 0;
        loop {
            let batch = self
                .storage
                .with_connection(|conn| DaoFactory::playback_event_dao(conn, tenant).list_unsynced(self.push_batch_size))
                .await?;
            if batch.is_empty() {
                break;
            }

            let ack = self.remote.push_events(tenant, &batch).await?;
            let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
            self.storage
                .with_connection(|conn| DaoFactory::playback_event_dao(conn, tenant).mark_synced(&ids, ack.server_time))
                .await?;
            pushed += batch.len();
            debug!("📤 已推送 {} 条事件 (serverTime={})", batch.len(), ack.server_time);

            if batch.len() < self.push_batch_size as usize {
                break;
            }
        }
        Ok(pushed)
    }

    async fn notify_rebuilds(&self, report: &RebuildReport) -> (Vec<String>, Vec<String>) {
        let mut rebuilt = Vec::with_capacity(report.rebuilt.len());
        for playthrough in &report.rebuilt {
            rebuilt.push(playthrough.id.clone());
            self.events.emit(event_builders::playthrough_rebuilt(playthrough)).await;
        }

        let mut deferred = Vec::new();
        for (playthrough_id, e) in &report.failed {
            if matches!(e, PlaythroughError::NotFound(_)) {
                continue;
            }
            if e.is_integrity() {
                deferred.push(playthrough_id.clone());
            }
            self.events.emit(event_builders::rebuild_failed(playthrough_id, e)).await;
        }
        (rebuilt, deferred)
    }
}
