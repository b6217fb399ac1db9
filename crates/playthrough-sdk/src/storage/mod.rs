//! 存储模块 - 事件日志与派生状态的持久化层
//!
//! - StorageManager: 统一的存储入口，持有唯一的 SQLite 连接
//! - DAO Layer: 每张表一个操作模块，全部按租户隔离
//! - Entities: 数据实体定义
//! - migrate: refinery 迁移

use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{PlaythroughError, Result};

pub mod dao;
pub mod entities;
pub mod migrate;

pub use dao::DaoFactory;
pub use entities::*;

/// 数据库文件名
const DB_FILE_NAME: &str = "playthroughs.db";

/// 存储管理器
///
/// 所有写入经由同一个连接串行化，多步写入统一走 `with_transaction`。
#[derive(Debug, Clone)]
pub struct StorageManager {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl StorageManager {
    /// 打开（或创建）`{data_dir}/playthroughs.db` 并执行迁移
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| PlaythroughError::Io(format!("创建数据目录失败: {}", e)))?;

        let db_path = data_dir.join(DB_FILE_NAME);
        let mut conn = Connection::open(&db_path)
            .map_err(|e| PlaythroughError::Database(format!("打开数据库失败: {}", e)))?;
        migrate::init_db(&mut conn)?;

        tracing::info!("数据库初始化完成: {}", db_path.display());

        Ok(Self {
            db_path: Some(db_path),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 内存数据库（测试、无持久化场景）
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate::init_db(&mut conn)?;
        Ok(Self {
            db_path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// 直接持有连接锁；持锁期间其他写入方全部等待
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// 单语句读写
    pub async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }

    /// 在事务中执行；闭包返回 Err 时整体回滚
    pub async fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R>,
    {
        let mut conn = self.conn.lock().await;
        Self::run_in_transaction(&mut conn, f)
    }

    /// 已持锁场景下的事务入口
    pub fn run_in_transaction<F, R>(conn: &mut Connection, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R>,
    {
        let tx = conn
            .transaction()
            .map_err(|e| PlaythroughError::Database(format!("开始事务失败: {}", e)))?;
        let result = f(&tx)?;
        tx.commit()
            .map_err(|e| PlaythroughError::Database(format!("提交事务失败: {}", e)))?;
        Ok(result)
    }
}
