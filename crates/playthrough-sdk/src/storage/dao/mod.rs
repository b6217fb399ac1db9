//! 数据访问层 (DAO) - 每张表一个专门的操作模块
//!
//! 每个 DAO 在构造时绑定一个租户，所有 SQL 都按 (url, user_email) 过滤或写入，
//! 调用方无法跨租户读写。

pub mod playback_event;
pub mod playthrough;
pub mod state_cache;
pub mod sync_cursor;

pub use playback_event::PlaybackEventDao;
pub use playthrough::PlaythroughDao;
pub use state_cache::StateCacheDao;
pub use sync_cursor::SyncCursorDao;

use rusqlite::Connection;

use crate::tenant::Tenant;

/// DAO 工厂 - 统一创建各种 DAO 实例
pub struct DaoFactory;

impl DaoFactory {
    pub fn playback_event_dao<'a>(conn: &'a Connection, tenant: &'a Tenant) -> PlaybackEventDao<'a> {
        PlaybackEventDao::new(conn, tenant)
    }

    pub fn playthrough_dao<'a>(conn: &'a Connection, tenant: &'a Tenant) -> PlaythroughDao<'a> {
        PlaythroughDao::new(conn, tenant)
    }

    pub fn state_cache_dao<'a>(conn: &'a Connection, tenant: &'a Tenant) -> StateCacheDao<'a> {
        StateCacheDao::new(conn, tenant)
    }

    pub fn sync_cursor_dao<'a>(conn: &'a Connection, tenant: &'a Tenant) -> SyncCursorDao<'a> {
        SyncCursorDao::new(conn, tenant)
    }
}
