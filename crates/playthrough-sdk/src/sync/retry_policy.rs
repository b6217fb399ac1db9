//! 同步失败后的退避策略 - 指数退避 + 随机抖动

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PlaythroughError;

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 连续失败达到该次数后不再缩短间隔，回到常规周期
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 300_000, // 5分钟
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 第 `retry_count` 次失败后的等待时间；不可重试或超过次数返回 None
    pub fn next_delay(&self, retry_count: u32, error: &PlaythroughError) -> Option<Duration> {
        if !self.should_retry(retry_count, error) {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ retry_count)
        let base_delay = self.base_delay_ms as f64 * self.backoff_factor.powf(retry_count as f64);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        Some(Duration::from_millis(final_delay as u64))
    }

    pub fn should_retry(&self, retry_count: u32, error: &PlaythroughError) -> bool {
        retry_count < self.max_retries && error.is_retryable()
    }
}
