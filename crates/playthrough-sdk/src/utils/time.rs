//! 时间处理工具
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（INTEGER）
//! - **业务层**: 统一经 `now_millis()` 取墙钟时间
//! - **日志**: `format_iso8601` 只用于日志输出，不参与任何比较

use chrono::{TimeZone, Utc};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC 毫秒时间戳 → RFC 3339 字符串；越界时间戳原样输出数字
pub fn format_iso8601(utc_timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(utc_timestamp_ms).single() {
        Some(dt) => dt.to_rfc3339(),
        None => utc_timestamp_ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_is_utc() {
        assert_eq!(format_iso8601(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_iso8601(i64::MAX), i64::MAX.to_string());
    }
}
