//! SDK 配置 - 存储目录、seek 防抖、心跳、同步周期、HTTP 客户端

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PlaythroughError, Result};
use crate::sync::retry_policy::RetryPolicy;

/// Seek 合并配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekConfig {
    /// 防抖窗口（毫秒）：窗口内的连续输入只落地一次
    pub debounce_ms: u64,
    /// seek 落地后再等待多久发出 SeekCompleted（毫秒）
    pub settle_ms: u64,
    /// 位移低于该值（秒）不写 seek 事件
    pub min_logged_displacement_secs: f64,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            settle_ms: 1_500,
            min_logged_displacement_secs: 2.0,
        }
    }
}

impl SeekConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// 播放心跳配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// 同步配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 周期同步间隔（秒）
    pub interval_secs: u64,
    /// 单次推送的最大事件数
    pub push_batch_size: u32,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            push_batch_size: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
    /// Bearer token；None 时不带 Authorization 头
    pub auth_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
            auth_token: None,
        }
    }
}

/// Playthrough SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaythroughConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 本设备标识，写入每条本地事件
    pub device_id: String,
    pub seek: SeekConfig,
    pub heartbeat: HeartbeatConfig,
    pub sync: SyncConfig,
    pub http: HttpClientConfig,
    /// 事件广播缓冲区大小
    pub event_channel_capacity: usize,
}

impl Default for PlaythroughConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            device_id: uuid::Uuid::new_v4().to_string(),
            seek: SeekConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            sync: SyncConfig::default(),
            http: HttpClientConfig::default(),
            event_channel_capacity: 256,
        }
    }
}

/// 获取默认数据目录 ~/.playthrough/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".playthrough")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".playthrough")
    } else {
        PathBuf::from("./playthrough_data")
    }
}

impl PlaythroughConfig {
    pub fn builder() -> PlaythroughConfigBuilder {
        PlaythroughConfigBuilder::new()
    }

    /// 从 JSON 文件加载；缺省字段取默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PlaythroughError::Config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| PlaythroughError::Config(format!("解析配置文件 {} 失败: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(PlaythroughError::Config("device_id 不能为空".into()));
        }
        if !self.seek.min_logged_displacement_secs.is_finite() || self.seek.min_logged_displacement_secs < 0.0 {
            return Err(PlaythroughError::Config(format!(
                "min_logged_displacement_secs 非法: {}",
                self.seek.min_logged_displacement_secs
            )));
        }
        if self.sync.retry.backoff_factor < 1.0 {
            return Err(PlaythroughError::Config(format!(
                "backoff_factor 必须 >= 1.0，当前 {}",
                self.sync.retry.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Playthrough SDK 配置构建器
pub struct PlaythroughConfigBuilder {
    config: PlaythroughConfig,
}

impl Default for PlaythroughConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaythroughConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PlaythroughConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn device_id<S: Into<String>>(mut self, device_id: S) -> Self {
        self.config.device_id = device_id.into();
        self
    }

    pub fn seek_debounce_ms(mut self, ms: u64) -> Self {
        self.config.seek.debounce_ms = ms;
        self
    }

    pub fn seek_settle_ms(mut self, ms: u64) -> Self {
        self.config.seek.settle_ms = ms;
        self
    }

    pub fn min_logged_seek_secs(mut self, secs: f64) -> Self {
        self.config.seek.min_logged_displacement_secs = secs;
        self
    }

    pub fn heartbeat_interval(mut self, secs: u64) -> Self {
        self.config.heartbeat.interval_secs = secs;
        self
    }

    pub fn sync_interval(mut self, secs: u64) -> Self {
        self.config.sync.interval_secs = secs;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.sync.retry = policy;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http = config;
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.http.auth_token = Some(token.into());
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> PlaythroughConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builder_overrides_defaults() {
        let config = PlaythroughConfig::builder()
            .data_dir("/tmp/pt")
            .device_id("phone-1")
            .seek_debounce_ms(250)
            .heartbeat_interval(15)
            .auth_token("secret")
            .build();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pt"));
        assert_eq!(config.device_id, "phone-1");
        assert_eq!(config.seek.debounce(), Duration::from_millis(250));
        assert_eq!(config.seek.min_logged_displacement_secs, 2.0);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(15));
        assert_eq!(config.http.auth_token.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"device_id":"tablet","seek":{"debounce_ms":800},"sync":{"interval_secs":60}}"#,
        )
        .unwrap();

        let config = PlaythroughConfig::from_json_file(&path).unwrap();
        assert_eq!(config.device_id, "tablet");
        assert_eq!(config.seek.debounce_ms, 800);
        assert_eq!(config.seek.settle_ms, SeekConfig::default().settle_ms);
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.sync.retry, RetryPolicy::default());
    }

    #[test]
    fn invalid_files_are_config_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"device_id":"  "}"#).unwrap();
        assert!(matches!(
            PlaythroughConfig::from_json_file(&path),
            Err(PlaythroughError::Config(_))
        ));
        assert!(matches!(
            PlaythroughConfig::from_json_file(dir.path().join("missing.json")),
            Err(PlaythroughError::Config(_))
        ));
    }
}
