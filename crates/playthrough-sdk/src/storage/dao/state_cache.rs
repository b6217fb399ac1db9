//! State cache DAO - playthrough_state_cache 表（提示数据，可随时丢弃）

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::entities::PlaythroughStateCache;
use crate::tenant::Tenant;

pub struct StateCacheDao<'a> {
    conn: &'a Connection,
    tenant: &'a Tenant,
}

impl<'a> StateCacheDao<'a> {
    pub fn new(conn: &'a Connection, tenant: &'a Tenant) -> Self {
        Self { conn, tenant }
    }

    /// 无条件 upsert
    pub fn touch(&self, playthrough_id: &str, position: f64, rate: f64, at: i64) -> Result<()> {
        let sql = r#"
            INSERT INTO playthrough_state_cache (
                url, user_email, playthrough_id, current_position, current_rate, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(url, user_email, playthrough_id) DO UPDATE SET
                current_position = excluded.current_position,
                current_rate = excluded.current_rate,
                updated_at = excluded.updated_at
        "#;
        self.conn.execute(
            sql,
            params![self.tenant.url, self.tenant.user_email, playthrough_id, position, rate, at],
        )?;
        Ok(())
    }

    pub fn get(&self, playthrough_id: &str) -> Result<Option<PlaythroughStateCache>> {
        let cache = self
            .conn
            .query_row(
                "SELECT playthrough_id, current_position, current_rate, updated_at
                 FROM playthrough_state_cache
                 WHERE url = ?1 AND user_email = ?2 AND playthrough_id = ?3",
                params![self.tenant.url, self.tenant.user_email, playthrough_id],
                |row| {
                    Ok(PlaythroughStateCache {
                        playthrough_id: row.get(0)?,
                        current_position: row.get(1)?,
                        current_rate: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(cache)
    }

    pub fn delete(&self, playthrough_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM playthrough_state_cache
             WHERE url = ?1 AND user_email = ?2 AND playthrough_id = ?3",
            params![self.tenant.url, self.tenant.user_email, playthrough_id],
        )?;
        Ok(n > 0)
    }
}
