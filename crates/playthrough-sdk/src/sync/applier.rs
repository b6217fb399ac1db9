//! 同步结果应用器 - 把一次增量拉取写入本地表
//!
//! 调用方负责事务：upsert（按 TRACKED_ENTITY_TYPES 顺序）→ tombstone → 推进游标，
//! 任何一步失败整批回滚，游标不动。

use rusqlite::Connection;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

use super::cursor_store::SyncCursorStore;
use super::entity_type::{EntityType, TRACKED_ENTITY_TYPES};
use super::remote::SyncResponse;
use crate::error::Result;
use crate::storage::entities::Tombstone;
use crate::storage::DaoFactory;
use crate::tenant::Tenant;

/// 一批变更应用后的统计与受影响的 playthrough
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub playthroughs_upserted: usize,
    /// 带有 status 但必填字段缺失、被跳过的远端行
    pub playthroughs_skipped: usize,
    pub events_inserted: usize,
    pub events_already_present: usize,
    pub deletions_applied: usize,
    pub deletions_skipped: usize,
    /// 新插入了事件或有事件被删除的 playthrough
    pub affected_playthroughs: BTreeSet<String>,
    /// 被 tombstone 删除的 playthrough
    pub deleted_playthroughs: BTreeSet<String>,
    pub cursor: i64,
}

impl ApplyOutcome {
    /// 需要重建的 playthrough：受影响且未被删除
    pub fn playthroughs_to_rebuild(&self) -> Vec<String> {
        self.affected_playthroughs
            .difference(&self.deleted_playthroughs)
            .cloned()
            .collect()
    }
}

pub fn apply_response(conn: &Connection, tenant: &Tenant, response: &SyncResponse) -> Result<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();

    for entity_type in TRACKED_ENTITY_TYPES {
        apply_upserts(conn, tenant, entity_type, response, &mut outcome)?;
    }

    for entity_type in TRACKED_ENTITY_TYPES {
        let tombstones = response
            .deletions
            .iter()
            .filter(|t| EntityType::from_str(&t.entity_type).ok() == Some(entity_type));
        for tombstone in tombstones {
            apply_tombstone(conn, tenant, entity_type, tombstone, &mut outcome)?;
        }
    }

    for tombstone in &response.deletions {
        if EntityType::from_str(&tombstone.entity_type).is_err() {
            debug!(
                "sync applier: 跳过未知类型的 tombstone type={} record_id={}",
                tombstone.entity_type, tombstone.record_id
            );
            outcome.deletions_skipped += 1;
        }
    }

    outcome.cursor = SyncCursorStore::advance_in(conn, tenant, response.server_time)?;
    Ok(outcome)
}

fn apply_upserts(
    conn: &Connection,
    tenant: &Tenant,
    entity_type: EntityType,
    response: &SyncResponse,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    match entity_type {
        EntityType::Playthrough => {
            let dao = DaoFactory::playthrough_dao(conn, tenant);
            for record in &response.playthroughs {
                if record.status.is_some() && record.parsed_status().is_none() {
                    debug!("sync applier: playthrough {} 的 status 无法识别: {:?}", record.id, record.status);
                } else if record.parsed_status().is_some() && !record.is_complete() {
                    debug!("sync applier: playthrough {} 缺少必填字段，跳过", record.id);
                    outcome.playthroughs_skipped += 1;
                    continue;
                }
                dao.upsert_record(record)?;
                outcome.playthroughs_upserted += 1;
            }
        }
        EntityType::PlaybackEvent => {
            let dao = DaoFactory::playback_event_dao(conn, tenant);
            for event in &response.playback_events {
                if dao.upsert_remote(event, response.server_time)? {
                    outcome.events_inserted += 1;
                    outcome.affected_playthroughs.insert(event.playthrough_id.clone());
                } else {
                    outcome.events_already_present += 1;
                }
            }
        }
    }
    Ok(())
}

fn apply_tombstone(
    conn: &Connection,
    tenant: &Tenant,
    entity_type: EntityType,
    tombstone: &Tombstone,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    match entity_type {
        EntityType::Playthrough => {
            let removed = DaoFactory::playthrough_dao(conn, tenant).delete(&tombstone.record_id)?;
            DaoFactory::state_cache_dao(conn, tenant).delete(&tombstone.record_id)?;
            outcome.deleted_playthroughs.insert(tombstone.record_id.clone());
            if removed {
                outcome.deletions_applied += 1;
            } else {
                outcome.deletions_skipped += 1;
            }
        }
        EntityType::PlaybackEvent => {
            match DaoFactory::playback_event_dao(conn, tenant).delete_by_id(&tombstone.record_id)? {
                Some(playthrough_id) => {
                    outcome.affected_playthroughs.insert(playthrough_id);
                    outcome.deletions_applied += 1;
                }
                None => outcome.deletions_skipped += 1,
            }
        }
    }
    Ok(())
}
