use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// 按调用方地址限制最小请求间隔
///
/// 只在进程内生效，重启即清空；被拒绝的请求不会刷新记录。
pub struct RateLimiter {
    min_interval: Duration,
    cleanup_threshold: usize,
    max_age: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, cleanup_threshold: usize, max_age: Duration) -> Self {
        Self {
            min_interval,
            cleanup_threshold,
            max_age,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            config.cleanup_threshold,
            Duration::from_secs(config.max_age_secs),
        )
    }

    /// 检查并记录一次请求，返回是否放行
    pub fn check_and_record(&self, address: &str) -> bool {
        self.check_and_record_at(address, Instant::now())
    }

    /// 同 `check_and_record`，时间由调用方提供
    pub fn check_and_record_at(&self, address: &str, now: Instant) -> bool {
        // 持锁期间不会 panic，锁中毒时沿用内部数据
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if last_seen.len() > self.cleanup_threshold {
            let before = last_seen.len();
            let max_age = self.max_age;
            last_seen.retain(|_, seen| now.saturating_duration_since(*seen) <= max_age);
            debug!(removed = before - last_seen.len(), remaining = last_seen.len(), "清理过期的限流记录");
        }

        if let Some(previous) = last_seen.get(address) {
            if now.saturating_duration_since(*previous) < self.min_interval {
                return false;
            }
        }

        last_seen.insert(address.to_string(), now);
        true
    }

    /// 当前记录的地址数
    pub fn len(&self) -> usize {
        self.last_seen
            .lock()
            .map(|m| m.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
