//! 数据库迁移与初始化 - 由 refinery 自动管理
//!
//! - Migration 版本 = migrations 文件顺序。
//! - 统一入口 `init_db`：pragmas → migrate → 版本校验。
//! - 新增迁移只需在 migrations/ 添加 V{n}__{name}.sql，编译期自动嵌入、自动执行。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;

use crate::error::{PlaythroughError, Result};
use crate::version::SDK_DB_VERSION;

/// refinery 使用的 migration 历史表名
const REFINERY_TABLE: &str = "refinery_schema_history";

/// 事件日志场景的 PRAGMA：WAL、NORMAL 同步、内存临时表。
const LOG_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA foreign_keys=ON;
PRAGMA temp_store=MEMORY;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(LOG_PRAGMAS.trim())
        .map_err(|e| PlaythroughError::Database(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

/// 执行内置 migrations（编译期嵌入，按版本顺序执行）。
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    embedded::migrations::runner().run(conn)?;
    Ok(())
}

/// 读取 refinery 表中当前数据库的 migration 版本；无表或空表返回 None。
fn get_db_migration_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        [REFINERY_TABLE],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(None);
    }

    let version: Option<i64> = conn.query_row(
        &format!("SELECT MAX(version) FROM {}", REFINERY_TABLE),
        [],
        |row| row.get::<_, Option<i64>>(0),
    )?;

    Ok(version.filter(|&v| v > 0))
}

/// 若 DB 版本 > 当前 SDK 支持的最高版本，拒绝使用。
fn check_db_version(conn: &Connection) -> Result<()> {
    let Some(v) = get_db_migration_version(conn)? else {
        return Ok(());
    };
    if v > SDK_DB_VERSION {
        return Err(PlaythroughError::Database(format!(
            "数据库版本 {} 高于当前 SDK 支持的最高版本 {}，请升级 SDK 后再打开",
            v, SDK_DB_VERSION
        )));
    }
    Ok(())
}

/// 统一初始化入口：先开 pragmas，再执行 migrations，最后做版本校验。
pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    run_migrations(conn)?;
    check_db_version(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_repeatable() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        init_db(&mut conn).unwrap();
        assert_eq!(get_db_migration_version(&conn).unwrap(), Some(SDK_DB_VERSION));

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('playback_event', 'playthrough', 'playthrough_state_cache', 'sync_cursor')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
