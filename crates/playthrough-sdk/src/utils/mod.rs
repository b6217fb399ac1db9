//! 工具模块

pub mod time;

pub use time::{format_iso8601, now_millis};
