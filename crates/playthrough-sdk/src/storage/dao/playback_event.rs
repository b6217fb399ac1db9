//! 播放事件 DAO - playback_event 表（只追加）

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::entities::{PlaybackEvent, PlaybackEventType};
use crate::tenant::Tenant;

const EVENT_COLUMNS: &str = "id, playthrough_id, event_type, timestamp, position, from_position, \
     to_position, playback_rate, previous_rate, media_id, device_id, synced_at";

pub struct PlaybackEventDao<'a> {
    conn: &'a Connection,
    tenant: &'a Tenant,
}

impl<'a> PlaybackEventDao<'a> {
    pub fn new(conn: &'a Connection, tenant: &'a Tenant) -> Self {
        Self { conn, tenant }
    }

    /// 追加一条本地事件；id 重复视为错误
    pub fn insert(&self, e: &PlaybackEvent) -> Result<()> {
        let sql = r#"
            INSERT INTO playback_event (
                id, url, user_email, playthrough_id, event_type, timestamp, position,
                from_position, to_position, playback_rate, previous_rate, media_id,
                device_id, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#;
        self.conn.execute(
            sql,
            params![
                e.id,
                self.tenant.url,
                self.tenant.user_email,
                e.playthrough_id,
                e.event_type.as_str(),
                e.timestamp,
                e.position,
                e.from_position,
                e.to_position,
                e.playback_rate,
                e.previous_rate,
                e.media_id,
                e.device_id,
                e.synced_at,
            ],
        )?;
        Ok(())
    }

    /// 写入远端事件。事件不可变：已存在时只补 synced_at。
    ///
    /// 返回 true 表示本地此前没有这条事件。
    pub fn upsert_remote(&self, e: &PlaybackEvent, synced_at: i64) -> Result<bool> {
        let sql = r#"
            INSERT INTO playback_event (
                id, url, user_email, playthrough_id, event_type, timestamp, position,
                from_position, to_position, playback_rate, previous_rate, media_id,
                device_id, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(url, user_email, id) DO NOTHING
        "#;
        let inserted = self.conn.execute(
            sql,
            params![
                e.id,
                self.tenant.url,
                self.tenant.user_email,
                e.playthrough_id,
                e.event_type.as_str(),
                e.timestamp,
                e.position,
                e.from_position,
                e.to_position,
                e.playback_rate,
                e.previous_rate,
                e.media_id,
                e.device_id,
                e.synced_at.unwrap_or(synced_at),
            ],
        )?;
        if inserted == 0 {
            self.conn.execute(
                "UPDATE playback_event SET synced_at = ?4
                 WHERE url = ?1 AND user_email = ?2 AND id = ?3 AND synced_at IS NULL",
                params![self.tenant.url, self.tenant.user_email, e.id, synced_at],
            )?;
        }
        Ok(inserted > 0)
    }

    /// 某个 playthrough 的完整事件序列：timestamp 升序，同一时间按写入顺序
    pub fn list_for_playthrough(&self, playthrough_id: &str) -> Result<Vec<PlaybackEvent>> {
        let sql = format!(
            "SELECT {} FROM playback_event
             WHERE url = ?1 AND user_email = ?2 AND playthrough_id = ?3
             ORDER BY timestamp ASC, seq ASC",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![self.tenant.url, self.tenant.user_email, playthrough_id],
            row_to_event,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 时间窗口内的事件（闭区间），按 timestamp 升序
    pub fn list_between(&self, from_ts: i64, to_ts: i64) -> Result<Vec<PlaybackEvent>> {
        let sql = format!(
            "SELECT {} FROM playback_event
             WHERE url = ?1 AND user_email = ?2 AND timestamp BETWEEN ?3 AND ?4
             ORDER BY timestamp ASC, seq ASC",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![self.tenant.url, self.tenant.user_email, from_ts, to_ts],
            row_to_event,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 尚未推送到远端的本地事件，按写入顺序
    pub fn list_unsynced(&self, limit: u32) -> Result<Vec<PlaybackEvent>> {
        let sql = format!(
            "SELECT {} FROM playback_event
             WHERE url = ?1 AND user_email = ?2 AND synced_at IS NULL
             ORDER BY seq ASC
             LIMIT ?3",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![self.tenant.url, self.tenant.user_email, limit],
            row_to_event,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn mark_synced(&self, ids: &[String], synced_at: i64) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "UPDATE playback_event SET synced_at = ?4
             WHERE url = ?1 AND user_email = ?2 AND id = ?3 AND synced_at IS NULL",
        )?;
        let mut updated = 0;
        for id in ids {
            updated += stmt.execute(params![self.tenant.url, self.tenant.user_email, id, synced_at])?;
        }
        Ok(updated)
    }

    /// 应用远端 tombstone；返回被删事件所属的 playthrough_id
    pub fn delete_by_id(&self, id: &str) -> Result<Option<String>> {
        let playthrough_id: Option<String> = self
            .conn
            .query_row(
                "SELECT playthrough_id FROM playback_event
                 WHERE url = ?1 AND user_email = ?2 AND id = ?3",
                params![self.tenant.url, self.tenant.user_email, id],
                |row| row.get(0),
            )
            .optional()?;
        if playthrough_id.is_some() {
            self.conn.execute(
                "DELETE FROM playback_event WHERE url = ?1 AND user_email = ?2 AND id = ?3",
                params![self.tenant.url, self.tenant.user_email, id],
            )?;
        }
        Ok(playthrough_id)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM playback_event WHERE url = ?1 AND user_email = ?2",
            params![self.tenant.url, self.tenant.user_email],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaybackEvent> {
    Ok(PlaybackEvent {
        id: row.get(0)?,
        playthrough_id: row.get(1)?,
        event_type: PlaybackEventType::parse(&row.get::<_, String>(2)?),
        timestamp: row.get(3)?,
        position: row.get(4)?,
        from_position: row.get(5)?,
        to_position: row.get(6)?,
        playback_rate: row.get(7)?,
        previous_rate: row.get(8)?,
        media_id: row.get(9)?,
        device_id: row.get(10)?,
        synced_at: row.get(11)?,
    })
}
