//! 状态折叠器 - 有序事件序列 → 派生状态
//!
//! `reduce` 是纯函数：同一有序输入永远得到同一输出，不读时钟、不访问存储。
//! `rebuild*` 负责在事务里读出完整事件序列、折叠并 upsert 权威行。

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{PlaythroughError, Result};
use crate::storage::entities::{PlaybackEvent, PlaybackEventType, Playthrough, PlaythroughStatus};
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;
use crate::utils::time::now_millis;

/// 折叠中间态；除身份字段外，在折叠到 start 之前全部为 None
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedState {
    pub id: String,
    pub url: String,
    pub user_email: String,
    pub media_id: Option<String>,
    pub status: Option<PlaythroughStatus>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub abandoned_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub position: Option<f64>,
    pub playback_rate: Option<f64>,
    pub last_event_at: Option<i64>,
}

impl DerivedState {
    pub fn empty(playthrough_id: &str, tenant: &Tenant) -> Self {
        Self {
            id: playthrough_id.to_string(),
            url: tenant.url.clone(),
            user_email: tenant.user_email.clone(),
            media_id: None,
            status: None,
            started_at: None,
            finished_at: None,
            abandoned_at: None,
            deleted_at: None,
            position: None,
            playback_rate: None,
            last_event_at: None,
        }
    }

    /// 折叠一步
    pub fn apply(mut self, event: &PlaybackEvent) -> Self {
        let ts = event.timestamp;
        match &event.event_type {
            PlaybackEventType::Start => {
                self.status = Some(PlaythroughStatus::InProgress);
                self.started_at = Some(ts);
                self.media_id = event.media_id.clone();
                self.position = Some(event.position.unwrap_or(0.0));
                self.playback_rate = Some(event.playback_rate.unwrap_or(1.0));
            }
            PlaybackEventType::Finish => {
                self.status = Some(PlaythroughStatus::Finished);
                self.finished_at = Some(ts);
            }
            PlaybackEventType::Abandon => {
                self.status = Some(PlaythroughStatus::Abandoned);
                self.abandoned_at = Some(ts);
            }
            PlaybackEventType::Delete => {
                self.status = Some(PlaythroughStatus::Deleted);
                self.deleted_at = Some(ts);
            }
            PlaybackEventType::Resume => {
                self.status = Some(PlaythroughStatus::InProgress);
                self.finished_at = None;
                self.abandoned_at = None;
                self.deleted_at = None;
            }
            PlaybackEventType::Play | PlaybackEventType::Pause => {
                if event.position.is_some() {
                    self.position = event.position;
                }
            }
            PlaybackEventType::Seek => {
                if event.to_position.is_some() {
                    self.position = event.to_position;
                }
            }
            PlaybackEventType::RateChange => {
                if event.playback_rate.is_some() {
                    self.playback_rate = event.playback_rate;
                }
            }
            PlaybackEventType::Unknown(kind) => {
                debug!("忽略未识别的事件类型: {} (event_id={})", kind, event.id);
            }
        }
        self.last_event_at = Some(ts);
        self
    }

    /// 折叠后仍为空的必需字段
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.media_id.is_none() {
            missing.push("media_id");
        }
        if self.status.is_none() {
            missing.push("status");
        }
        if self.started_at.is_none() {
            missing.push("started_at");
        }
        if self.position.is_none() {
            missing.push("position");
        }
        if self.playback_rate.is_none() {
            missing.push("playback_rate");
        }
        if self.last_event_at.is_none() {
            missing.push("last_event_at");
        }
        missing
    }

    /// 转为可写入的权威行；缺字段时返回 `ReductionIntegrity`
    pub fn into_playthrough(self, refreshed_at: i64) -> Result<Playthrough> {
        let missing = self.missing_fields();
        match (
            self.media_id,
            self.status,
            self.started_at,
            self.position,
            self.playback_rate,
            self.last_event_at,
        ) {
            (
                Some(media_id),
                Some(status),
                Some(started_at),
                Some(position),
                Some(playback_rate),
                Some(last_event_at),
            ) => Ok(Playthrough {
                id: self.id,
                url: self.url,
                user_email: self.user_email,
                media_id,
                status,
                started_at,
                finished_at: self.finished_at,
                abandoned_at: self.abandoned_at,
                deleted_at: self.deleted_at,
                position,
                playback_rate,
                last_event_at,
                refreshed_at: Some(refreshed_at),
            }),
            _ => Err(PlaythroughError::ReductionIntegrity {
                playthrough_id: self.id,
                missing,
            }),
        }
    }
}

/// 把事件序列折叠为派生状态
///
/// 按 timestamp 做稳定排序：同一时间戳保持传入（即存储）顺序，不引入任何次级排序键。
/// 不属于该 playthrough 的事件被跳过。
pub fn reduce(events: &[PlaybackEvent], playthrough_id: &str, tenant: &Tenant) -> DerivedState {
    let mut ordered: Vec<&PlaybackEvent> = events
        .iter()
        .filter(|e| e.playthrough_id == playthrough_id)
        .collect();
    ordered.sort_by_key(|e| e.timestamp);

    ordered
        .into_iter()
        .fold(DerivedState::empty(playthrough_id, tenant), DerivedState::apply)
}

/// 在给定连接（通常是事务）内重建一个 playthrough
///
/// 事件为空返回 `NotFound`；缺少 start 等必需字段返回 `ReductionIntegrity`，
/// 两种情况下都不会写入，权威行保持原值。
pub fn rebuild_in(
    conn: &Connection,
    tenant: &Tenant,
    playthrough_id: &str,
    refreshed_at: i64,
) -> Result<Playthrough> {
    let events = DaoFactory::playback_event_dao(conn, tenant).list_for_playthrough(playthrough_id)?;
    if events.is_empty() {
        return Err(PlaythroughError::NotFound(format!(
            "playthrough {} 没有任何事件",
            playthrough_id
        )));
    }

    let playthrough = reduce(&events, playthrough_id, tenant).into_playthrough(refreshed_at)?;
    DaoFactory::playthrough_dao(conn, tenant).upsert(&playthrough)?;
    debug!(
        "playthrough {} 已重建: status={}, position={}, events={}",
        playthrough_id,
        playthrough.status,
        playthrough.position,
        events.len()
    );
    Ok(playthrough)
}

/// 重建单个 playthrough（独立事务）
pub async fn rebuild(storage: &StorageManager, tenant: &Tenant, playthrough_id: &str) -> Result<Playthrough> {
    let result = storage
        .with_transaction(|tx| rebuild_in(tx, tenant, playthrough_id, now_millis()))
        .await;
    if let Err(e @ PlaythroughError::ReductionIntegrity { .. }) = &result {
        error!("重建 playthrough 失败，保留上一次的权威状态: {}", e);
    }
    result
}

/// 批量重建结果
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub rebuilt: Vec<Playthrough>,
    pub failed: Vec<(String, PlaythroughError)>,
}

impl RebuildReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 每个 playthrough 在各自的 savepoint 里重建，失败只回滚它自己
pub(crate) fn rebuild_in_savepoint(
    conn: &Connection,
    tenant: &Tenant,
    playthrough_id: &str,
    refreshed_at: i64,
) -> Result<Playthrough> {
    conn.execute_batch("SAVEPOINT rebuild_one")?;
    match rebuild_in(conn, tenant, playthrough_id, refreshed_at) {
        Ok(p) => {
            conn.execute_batch("RELEASE rebuild_one")?;
            Ok(p)
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO rebuild_one; RELEASE rebuild_one")?;
            Err(e)
        }
    }
}

/// 在一个事务里顺序重建多个 playthrough
///
/// 单个失败只影响它自己：错误记入报告，其余照常重建并一起提交。
pub fn rebuild_many_in(conn: &Connection, tenant: &Tenant, playthrough_ids: &[String]) -> RebuildReport {
    let mut report = RebuildReport::default();
    let refreshed_at = now_millis();
    for id in playthrough_ids {
        match rebuild_in_savepoint(conn, tenant, id, refreshed_at) {
            Ok(p) => report.rebuilt.push(p),
            Err(e) => {
                if e.is_integrity() {
                    error!("重建 playthrough 失败，保留上一次的权威状态: {}", e);
                } else {
                    debug!("跳过 playthrough {} 的重建: {}", id, e);
                }
                report.failed.push((id.clone(), e));
            }
        }
    }
    report
}

pub async fn rebuild_many(
    storage: &StorageManager,
    tenant: &Tenant,
    playthrough_ids: &[String],
) -> Result<RebuildReport> {
    if playthrough_ids.is_empty() {
        return Ok(RebuildReport::default());
    }
    let report = storage
        .with_transaction(|tx| Ok(rebuild_many_in(tx, tenant, playthrough_ids)))
        .await?;
    info!(
        "批量重建完成: 成功 {} 个，失败 {} 个",
        report.rebuilt.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::dao::PlaybackEventDao;

    const T0: i64 = 1_700_000_000_000;

    fn tenant() -> Tenant {
        Tenant::new("https://books.example.com", "reader@example.com")
    }

    fn ev(kind: PlaybackEventType, offset: i64, device: &str) -> PlaybackEvent {
        PlaybackEvent::new("pt-1", kind, T0 + offset, device)
    }

    fn lifecycle_events() -> Vec<PlaybackEvent> {
        vec![
            ev(PlaybackEventType::Start, 0, "phone")
                .with_media("book-42")
                .with_position(0.0)
                .with_rate(1.0, None),
            ev(PlaybackEventType::Play, 1_000, "phone").with_position(0.0),
            ev(PlaybackEventType::Pause, 2_000, "phone").with_position(120.0),
            ev(PlaybackEventType::Seek, 3_000, "phone").with_seek(120.0, 300.0),
            ev(PlaybackEventType::Finish, 4_000, "phone"),
        ]
    }

    #[test]
    fn lifecycle_fold() {
        let state = reduce(&lifecycle_events(), "pt-1", &tenant());
        assert_eq!(state.status, Some(PlaythroughStatus::Finished));
        assert_eq!(state.position, Some(300.0));
        assert_eq!(state.playback_rate, Some(1.0));
        assert_eq!(state.started_at, Some(T0));
        assert_eq!(state.finished_at, Some(T0 + 4_000));
        assert_eq!(state.last_event_at, Some(T0 + 4_000));
        assert_eq!(state.media_id.as_deref(), Some("book-42"));
    }

    #[test]
    fn reduce_is_deterministic() {
        let events = lifecycle_events();
        let a = serde_json::to_vec(&reduce(&events, "pt-1", &tenant())).unwrap();
        let b = serde_json::to_vec(&reduce(&events, "pt-1", &tenant())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn devices_converge_regardless_of_arrival_order() {
        let mut events = vec![
            ev(PlaybackEventType::Start, 0, "phone").with_media("b").with_position(10.0),
            ev(PlaybackEventType::Pause, 5_000, "tablet").with_position(50.0),
            ev(PlaybackEventType::RateChange, 6_000, "phone").with_rate(1.5, Some(1.0)),
            ev(PlaybackEventType::Seek, 7_000, "tablet").with_seek(50.0, 90.0),
        ];
        let expected = reduce(&events, "pt-1", &tenant());

        // 模拟另一台设备以不同顺序收到同一批事件
        events.reverse();
        let other_device = reduce(&events, "pt-1", &tenant());
        assert_eq!(expected, other_device);
        assert_eq!(other_device.position, Some(90.0));
        assert_eq!(other_device.playback_rate, Some(1.5));
    }

    #[test]
    fn equal_timestamps_keep_storage_order() {
        let events = vec![
            ev(PlaybackEventType::Start, 0, "a").with_media("b"),
            ev(PlaybackEventType::Pause, 100, "a").with_position(10.0),
            ev(PlaybackEventType::Pause, 100, "b").with_position(20.0),
        ];
        assert_eq!(reduce(&events, "pt-1", &tenant()).position, Some(20.0));
    }

    #[test]
    fn start_defaults_and_resume_clears_terminal_timestamps() {
        let events = vec![
            ev(PlaybackEventType::Start, 0, "a").with_media("b"),
            ev(PlaybackEventType::Abandon, 10, "a"),
            ev(PlaybackEventType::Delete, 20, "a"),
            ev(PlaybackEventType::Resume, 30, "a"),
            ev(PlaybackEventType::Play, 40, "a"),
            ev(PlaybackEventType::Unknown("bookmark".into()), 50, "a").with_position(999.0),
        ];
        let state = reduce(&events, "pt-1", &tenant());
        assert_eq!(state.status, Some(PlaythroughStatus::InProgress));
        assert_eq!(state.position, Some(0.0));
        assert_eq!(state.playback_rate, Some(1.0));
        assert_eq!(state.abandoned_at, None);
        assert_eq!(state.deleted_at, None);
        assert_eq!(state.last_event_at, Some(T0 + 50));
    }

    #[test]
    fn missing_start_is_an_integrity_error() {
        let events = vec![ev(PlaybackEventType::Pause, 0, "a").with_position(5.0)];
        let err = reduce(&events, "pt-1", &tenant()).into_playthrough(1).unwrap_err();
        match err {
            PlaythroughError::ReductionIntegrity { playthrough_id, missing } => {
                assert_eq!(playthrough_id, "pt-1");
                assert!(missing.contains(&"status"));
                assert!(missing.contains(&"media_id"));
                assert!(!missing.contains(&"position"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let storage = StorageManager::open_in_memory().unwrap();
        let tenant = tenant();
        storage
            .with_transaction(|tx| {
                let dao = PlaybackEventDao::new(tx, &tenant);
                for e in lifecycle_events() {
                    dao.insert(&e)?;
                }
                Ok(())
            })
            .await
            .unwrap();

        let mut first = rebuild(&storage, &tenant, "pt-1").await.unwrap();
        let mut second = rebuild(&storage, &tenant, "pt-1").await.unwrap();
        first.refreshed_at = None;
        second.refreshed_at = None;
        assert_eq!(first, second);
        assert_eq!(first.status, PlaythroughStatus::Finished);
    }

    #[tokio::test]
    async fn integrity_failure_leaves_previous_row_untouched() {
        let storage = StorageManager::open_in_memory().unwrap();
        let tenant = tenant();

        // 已有的权威行
        let previous = Playthrough {
            id: "pt-1".into(),
            url: tenant.url.clone(),
            user_email: tenant.user_email.clone(),
            media_id: "book-42".into(),
            status: PlaythroughStatus::InProgress,
            started_at: T0,
            finished_at: None,
            abandoned_at: None,
            deleted_at: None,
            position: 42.0,
            playback_rate: 1.0,
            last_event_at: T0,
            refreshed_at: Some(T0),
        };
        storage
            .with_transaction(|tx| {
                DaoFactory::playthrough_dao(tx, &tenant).upsert(&previous)?;
                PlaybackEventDao::new(tx, &tenant)
                    .insert(&ev(PlaybackEventType::Pause, 10, "a").with_position(77.0))
            })
            .await
            .unwrap();

        let err = rebuild(&storage, &tenant, "pt-1").await.unwrap_err();
        assert!(err.is_integrity());

        let stored = storage
            .with_connection(|conn| DaoFactory::playthrough_dao(conn, &tenant).get("pt-1"))
            .await
            .unwrap();
        assert_eq!(stored, Some(previous));
    }

    #[tokio::test]
    async fn one_broken_playthrough_does_not_block_the_batch() {
        let storage = StorageManager::open_in_memory().unwrap();
        let tenant = tenant();
        storage
            .with_transaction(|tx| {
                let dao = PlaybackEventDao::new(tx, &tenant);
                for e in lifecycle_events() {
                    dao.insert(&e)?;
                }
                dao.insert(&PlaybackEvent::new("orphan", PlaybackEventType::Play, T0, "a"))
            })
            .await
            .unwrap();

        let ids = vec!["orphan".to_string(), "pt-1".to_string(), "never-seen".to_string()];
        let report = rebuild_many(&storage, &tenant, &ids).await.unwrap();
        assert_eq!(report.rebuilt.len(), 1);
        assert_eq!(report.rebuilt[0].id, "pt-1");
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].1.is_integrity());
        assert!(matches!(report.failed[1].1, PlaythroughError::NotFound(_)));
    }
}
