use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaythroughError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 播放后端调用失败（seek/set_rate/get_progress）
    #[error("Transport error: {0}")]
    Transport(String),
    /// 本地写日志失败
    #[error("Recording error: {0}")]
    Recording(String),
    /// 网络不可达 / 超时
    #[error("Sync network error: {0}")]
    SyncNetwork(String),
    /// 远端返回了错误响应
    #[error("Sync server error [{status}]: {message}")]
    SyncServer { status: u16, message: String },
    /// 折叠非空事件序列后仍缺少必需字段（通常是缺少 start 事件）
    #[error("Reduction integrity error for playthrough {playthrough_id}: missing {missing:?}")]
    ReductionIntegrity {
        playthrough_id: String,
        missing: Vec<&'static str>,
    },
}

impl From<serde_json::Error> for PlaythroughError {
    fn from(error: serde_json::Error) -> Self {
        PlaythroughError::Json(error.to_string())
    }
}

impl From<std::io::Error> for PlaythroughError {
    fn from(error: std::io::Error) -> Self {
        PlaythroughError::Io(error.to_string())
    }
}

impl From<refinery::Error> for PlaythroughError {
    fn from(error: refinery::Error) -> Self {
        PlaythroughError::Migration(error.to_string())
    }
}

impl From<reqwest::Error> for PlaythroughError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => PlaythroughError::SyncServer {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => PlaythroughError::SyncNetwork(error.to_string()),
        }
    }
}

impl PlaythroughError {
    /// 是否值得在下一次同步触发时重试
    pub fn is_retryable(&self) -> bool {
        match self {
            PlaythroughError::SyncNetwork(_) => true,
            // 5xx 可重试，4xx 不重试
            PlaythroughError::SyncServer { status, .. } => *status >= 500 && *status < 600,
            PlaythroughError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, PlaythroughError::ReductionIntegrity { .. })
    }

    pub fn is_sync_error(&self) -> bool {
        matches!(
            self,
            PlaythroughError::SyncNetwork(_) | PlaythroughError::SyncServer { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PlaythroughError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PlaythroughError::SyncNetwork("timeout".into()).is_retryable());
        assert!(PlaythroughError::SyncServer { status: 503, message: String::new() }.is_retryable());
        assert!(!PlaythroughError::SyncServer { status: 401, message: String::new() }.is_retryable());
        assert!(!PlaythroughError::ReductionIntegrity {
            playthrough_id: "p".into(),
            missing: vec!["status"],
        }
        .is_retryable());
    }

    #[test]
    fn integrity_error_message_names_fields() {
        let err = PlaythroughError::ReductionIntegrity {
            playthrough_id: "p1".into(),
            missing: vec!["media_id", "started_at"],
        };
        assert!(err.is_integrity());
        let text = err.to_string();
        assert!(text.contains("p1"));
        assert!(text.contains("media_id"));
    }
}
