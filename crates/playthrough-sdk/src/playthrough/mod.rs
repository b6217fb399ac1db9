//! Playthrough 模块 - 事件日志之上的本地播放进度
//!
//! - reducer: 事件序列 → 权威行（纯函数 + 事务内重建）
//! - recorder: 本地事件写入
//! - state_cache: 展示状态合成
//! - seek: seek 输入合并
//! - heartbeat: 播放心跳
//! - session: 播放后端事件 → 事件日志

pub mod heartbeat;
pub mod recorder;
pub mod reducer;
pub mod seek;
pub mod session;
pub mod state_cache;

pub use heartbeat::ProgressHeartbeat;
pub use recorder::EventRecorder;
pub use reducer::{rebuild, rebuild_many, reduce, DerivedState, RebuildReport};
pub use seek::{SeekCoordinator, SeekSource};
pub use session::PlaybackSession;
pub use state_cache::{display_state, display_state_for_media, resolve_display_state, DisplaySource, DisplayState};
