//! Playthrough DAO - 权威派生行
//!
//! status 或任一必填列为空的行是未初始化完成的残留，读接口一律过滤掉。

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PlaythroughError, Result};
use crate::storage::entities::{Playthrough, PlaythroughRecord, PlaythroughStatus};
use crate::tenant::Tenant;

const PLAYTHROUGH_COLUMNS: &str = "id, url, user_email, media_id, status, started_at, finished_at, \
     abandoned_at, deleted_at, position, playback_rate, last_event_at, refreshed_at";

/// 可以读出为 `Playthrough` 的行
const INITIALIZED: &str = "status IS NOT NULL AND media_id IS NOT NULL AND started_at IS NOT NULL \
     AND position IS NOT NULL AND playback_rate IS NOT NULL AND last_event_at IS NOT NULL";

pub struct PlaythroughDao<'a> {
    conn: &'a Connection,
    tenant: &'a Tenant,
}

impl<'a> PlaythroughDao<'a> {
    pub fn new(conn: &'a Connection, tenant: &'a Tenant) -> Self {
        Self { conn, tenant }
    }

    /// 按 (tenant, id) 插入或覆盖全部可变字段
    pub fn upsert(&self, p: &Playthrough) -> Result<()> {
        let sql = r#"
            INSERT INTO playthrough (
                id, url, user_email, media_id, status, started_at, finished_at,
                abandoned_at, deleted_at, position, playback_rate, last_event_at, refreshed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(url, user_email, id) DO UPDATE SET
                media_id = excluded.media_id,
                status = excluded.status,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                abandoned_at = excluded.abandoned_at,
                deleted_at = excluded.deleted_at,
                position = excluded.position,
                playback_rate = excluded.playback_rate,
                last_event_at = excluded.last_event_at,
                refreshed_at = excluded.refreshed_at
        "#;
        self.conn.execute(
            sql,
            params![
                p.id,
                self.tenant.url,
                self.tenant.user_email,
                p.media_id,
                p.status.as_str(),
                p.started_at,
                p.finished_at,
                p.abandoned_at,
                p.deleted_at,
                p.position,
                p.playback_rate,
                p.last_event_at,
                p.refreshed_at,
            ],
        )?;
        Ok(())
    }

    /// 写入远端下发的行：远端覆盖全部可变字段，refreshed_at 保持本地值
    ///
    /// 不完整的行以 status = NULL 落库。
    pub fn upsert_record(&self, r: &PlaythroughRecord) -> Result<()> {
        let sql = r#"
            INSERT INTO playthrough (
                id, url, user_email, media_id, status, started_at, finished_at,
                abandoned_at, deleted_at, position, playback_rate, last_event_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(url, user_email, id) DO UPDATE SET
                media_id = excluded.media_id,
                status = excluded.status,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                abandoned_at = excluded.abandoned_at,
                deleted_at = excluded.deleted_at,
                position = excluded.position,
                playback_rate = excluded.playback_rate,
                last_event_at = excluded.last_event_at
        "#;
        self.conn.execute(
            sql,
            params![
                r.id,
                self.tenant.url,
                self.tenant.user_email,
                r.media_id,
                r.parsed_status().filter(|_| r.is_complete()).map(PlaythroughStatus::as_str),
                r.started_at,
                r.finished_at,
                r.abandoned_at,
                r.deleted_at,
                r.position,
                r.playback_rate,
                r.last_event_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Playthrough>> {
        let sql = format!(
            "SELECT {} FROM playthrough
             WHERE url = ?1 AND user_email = ?2 AND id = ?3 AND {}",
            PLAYTHROUGH_COLUMNS, INITIALIZED
        );
        let p = self
            .conn
            .query_row(
                &sql,
                params![self.tenant.url, self.tenant.user_email, id],
                row_to_playthrough,
            )
            .optional()?;
        p.transpose()
    }

    /// 列出某状态（None = 全部）的 playthrough，最近活动在前
    pub fn list(&self, status: Option<PlaythroughStatus>) -> Result<Vec<Playthrough>> {
        let sql = format!(
            "SELECT {} FROM playthrough
             WHERE url = ?1 AND user_email = ?2 AND {}
               AND (?3 IS NULL OR status = ?3)
             ORDER BY last_event_at DESC",
            PLAYTHROUGH_COLUMNS, INITIALIZED
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                self.tenant.url,
                self.tenant.user_email,
                status.map(PlaythroughStatus::as_str)
            ],
            row_to_playthrough,
        )?;
        let playthroughs = rows
            .map(|r| r.map_err(PlaythroughError::from).and_then(|p| p))
            .collect::<Result<Vec<_>>>();
        playthroughs
    }

    /// 某个媒体最近一次的 playthrough（未删除）
    pub fn latest_for_media(&self, media_id: &str) -> Result<Option<Playthrough>> {
        let sql = format!(
            "SELECT {} FROM playthrough
             WHERE url = ?1 AND user_email = ?2 AND media_id = ?3
               AND {} AND status != 'deleted'
             ORDER BY last_event_at DESC
             LIMIT 1",
            PLAYTHROUGH_COLUMNS, INITIALIZED
        );
        let p = self
            .conn
            .query_row(
                &sql,
                params![self.tenant.url, self.tenant.user_email, media_id],
                row_to_playthrough,
            )
            .optional()?;
        p.transpose()
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM playthrough WHERE url = ?1 AND user_email = ?2 AND id = ?3",
            params![self.tenant.url, self.tenant.user_email, id],
        )?;
        Ok(n > 0)
    }
}

/// 外层 rusqlite::Result 处理列读取，内层 Result 处理 status 非法值
fn row_to_playthrough(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Playthrough>> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let Some(status) = PlaythroughStatus::parse(&status) else {
        return Ok(Err(PlaythroughError::Database(format!(
            "playthrough {} 的 status 非法: {}",
            id, status
        ))));
    };
    Ok(Ok(Playthrough {
        id,
        url: row.get(1)?,
        user_email: row.get(2)?,
        media_id: row.get(3)?,
        status,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        abandoned_at: row.get(7)?,
        deleted_at: row.get(8)?,
        position: row.get(9)?,
        playback_rate: row.get(10)?,
        last_event_at: row.get(11)?,
        refreshed_at: row.get(12)?,
    }))
}
