//! Playthrough SDK - 长音频播放进度的本地事件日志与增量同步
//!
//! 本 SDK 提供：
//! - 📝 只追加的播放事件日志，按时间戳折叠出权威播放进度
//! - ⏩ seek 输入合并：连续拖动/快进只发一次 seek、只记一条事件
//! - 💓 播放心跳：播放期间定期保存位置
//! - 🔄 增量同步：推送本地事件、按游标拉取远端变更、tombstone 删除
//! - 🏷️ 多租户：所有数据按 (服务地址, 账号) 隔离
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playthrough_sdk::{PlaythroughConfig, PlaythroughSdk, Tenant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlaythroughConfig::builder()
//!         .data_dir("/path/to/data")
//!         .device_id("phone-1")
//!         .build();
//!
//!     let sdk = PlaythroughSdk::initialize_with_http(config).await?;
//!     let tenant = Tenant::new("https://books.example.com", "reader@example.com");
//!
//!     let playthrough = sdk.start_playthrough(&tenant, "book-42", 0.0, 1.0).await?;
//!     sdk.start_sync(&tenant)?;
//!
//!     let state = sdk.display_state(&tenant, &playthrough.id).await?;
//!     println!("当前进度: {:?}", state.map(|s| s.position));
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod playthrough;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod tenant;
pub mod transport;
pub mod utils;
pub mod version;

#[cfg(test)]
mod test_support;

pub use config::{HeartbeatConfig, HttpClientConfig, PlaythroughConfig, PlaythroughConfigBuilder, SeekConfig, SyncConfig};
pub use error::{PlaythroughError, Result};
pub use events::{EventFilter, EventManager, FilteredEventReceiver, PlaybackNotification};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use playthrough::{
    DisplaySource, DisplayState, EventRecorder, PlaybackSession, ProgressHeartbeat, SeekCoordinator, SeekSource,
};
pub use sdk::PlaythroughSdk;
pub use storage::entities::{
    PlaybackEvent, PlaybackEventType, Playthrough, PlaythroughRecord, PlaythroughStateCache, PlaythroughStatus,
    SyncCursor, Tombstone,
};
pub use storage::StorageManager;
pub use sync::{
    HttpRemoteAuthority, PushAck, RemoteAuthority, RetryPolicy, SyncEngine, SyncOutcome, SyncReport, SyncResponse,
    SyncScheduler,
};
pub use tenant::Tenant;
pub use transport::{PlaybackTransport, TransportEvent, TransportProgress};
pub use version::{BUILD_TIME, SDK_DB_VERSION, SDK_VERSION};
