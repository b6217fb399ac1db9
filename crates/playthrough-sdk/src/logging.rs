//! 日志初始化
//!
//! SDK 内部只使用 `tracing` 宏；宿主没有自己的 subscriber 时可以调用 `init_tracing`。

use tracing::Level;

/// 安装一个输出到 stdout 的 fmt subscriber
///
/// 重复调用（或宿主已经安装了 subscriber）时返回 false，不会 panic。
pub fn init_tracing(max_level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// 解析 "trace" / "debug" / "info" / "warn" / "error"，无法识别时回落到 info
pub fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}
