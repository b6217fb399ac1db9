//! 同步游标存储 - 每个租户一个 last_sync_timestamp
//!
//! 游标只会在同步事务内推进（见 `advance_in`），读取与重置走独立连接。

use rusqlite::Connection;

use crate::error::Result;
use crate::storage::{DaoFactory, StorageManager};
use crate::tenant::Tenant;

#[derive(Debug, Clone)]
pub struct SyncCursorStore {
    storage: StorageManager,
}

impl SyncCursorStore {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }

    /// None 表示从未同步，下一次做全量
    pub async fn get(&self, tenant: &Tenant) -> Result<Option<i64>> {
        self.storage
            .with_connection(|conn| {
                Ok(DaoFactory::sync_cursor_dao(conn, tenant)
                    .get()?
                    .map(|c| c.last_sync_timestamp))
            })
            .await
    }

    /// 强制下一次全量同步
    pub async fn reset(&self, tenant: &Tenant) -> Result<()> {
        self.storage
            .with_connection(|conn| DaoFactory::sync_cursor_dao(conn, tenant).reset())
            .await
    }

    /// 在调用方的事务内推进到 max(旧值, server_time)
    pub fn advance_in(conn: &Connection, tenant: &Tenant, server_time: i64) -> Result<i64> {
        DaoFactory::sync_cursor_dao(conn, tenant).advance(server_time)
    }
}
