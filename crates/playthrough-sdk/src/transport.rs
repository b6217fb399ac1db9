//! 播放后端抽象 - 解码/渲染由宿主实现，SDK 只发指令、读进度

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 当前进度快照（秒）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportProgress {
    pub position: f64,
    pub duration: f64,
}

/// 播放后端上报的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportEvent {
    Started,
    Paused,
    QueueEnded,
    SeekCompleted,
    RateChanged(f64),
}

/// 播放后端
///
/// 实现方返回的错误一律记日志后吞掉，不会影响 SDK 状态。
#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    async fn seek_to(&self, position: f64) -> Result<()>;

    async fn set_rate(&self, rate: f64) -> Result<()>;

    async fn get_progress(&self) -> Result<TransportProgress>;

    async fn get_rate(&self) -> Result<f64>;
}
