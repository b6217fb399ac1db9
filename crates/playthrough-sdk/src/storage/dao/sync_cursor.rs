//! 同步游标 DAO - 每个租户一行

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::entities::SyncCursor;
use crate::tenant::Tenant;

pub struct SyncCursorDao<'a> {
    conn: &'a Connection,
    tenant: &'a Tenant,
}

impl<'a> SyncCursorDao<'a> {
    pub fn new(conn: &'a Connection, tenant: &'a Tenant) -> Self {
        Self { conn, tenant }
    }

    pub fn get(&self) -> Result<Option<SyncCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT url, user_email, last_sync_timestamp FROM sync_cursor
                 WHERE url = ?1 AND user_email = ?2",
                params![self.tenant.url, self.tenant.user_email],
                |row| {
                    Ok(SyncCursor {
                        url: row.get(0)?,
                        user_email: row.get(1)?,
                        last_sync_timestamp: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    /// 推进游标，取 max(旧值, server_time)；返回写入后的值
    pub fn advance(&self, server_time: i64) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO sync_cursor (url, user_email, last_sync_timestamp)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(url, user_email) DO UPDATE SET
                last_sync_timestamp = MAX(last_sync_timestamp, excluded.last_sync_timestamp)
            "#,
            params![self.tenant.url, self.tenant.user_email, server_time],
        )?;
        let value: i64 = self.conn.query_row(
            "SELECT last_sync_timestamp FROM sync_cursor WHERE url = ?1 AND user_email = ?2",
            params![self.tenant.url, self.tenant.user_email],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// 删除游标，下一次同步将做全量
    pub fn reset(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_cursor WHERE url = ?1 AND user_email = ?2",
            params![self.tenant.url, self.tenant.user_email],
        )?;
        Ok(())
    }
}
