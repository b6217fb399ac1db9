//! 增量同步模块
//!
//! 职责：
//! - 推送本地事件、按游标拉取远端变更（`engine`）
//! - 在一个事务内应用变更、推进游标（`applier`、`cursor_store`）
//! - 周期 / 前台触发 / 失败退避（`scheduler`、`retry_policy`）
//! - 远端接口与 HTTP 实现（`remote`）

pub mod applier;
pub mod cursor_store;
pub mod engine;
pub mod entity_type;
pub mod remote;
pub mod retry_policy;
pub mod scheduler;

pub use applier::{apply_response, ApplyOutcome};
pub use cursor_store::SyncCursorStore;
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use entity_type::{EntityType, TRACKED_ENTITY_TYPES};
pub use remote::{HttpRemoteAuthority, PushAck, RemoteAuthority, SyncResponse};
pub use retry_policy::RetryPolicy;
pub use scheduler::SyncScheduler;
