use crate::config::Config;
use crate::error::RelayError;
use crate::metrics::global_metrics;
use crate::normalizer::{normalize, TextStream};
use crate::providers::registry::Registry;
use crate::ratelimit::RateLimiter;
use crate::types::ChatRequest;
use crate::Result;
use std::time::Duration;
use tracing::{info, warn};

/// 默认的单片段等待上限
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(180);

/// 请求分发：鉴权 -> 限流 -> 解析适配器 -> 归一化输出
pub struct Gateway {
    registry: Registry,
    limiter: RateLimiter,
    password: Option<String>,
    idle_timeout: Duration,
}

impl Gateway {
    pub fn new(registry: Registry, limiter: RateLimiter) -> Self {
        Self {
            registry,
            limiter,
            password: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut gateway = Self::new(
            Registry::from_config(config)?,
            RateLimiter::from_config(&config.rate_limit),
        )
        .with_idle_timeout(config.server.idle_timeout());
        gateway.password = config.server.password.clone().filter(|p| !p.is_empty());
        Ok(gateway)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 校验 `x-api-password`；未配置口令时一律放行
    pub fn authorize(&self, supplied: Option<&str>) -> Result<()> {
        match &self.password {
            Some(expected) if supplied != Some(expected.as_str()) => {
                global_metrics().record_unauthorized();
                Err(RelayError::Unauthorized)
            }
            _ => Ok(()),
        }
    }

    /// 处理一次对话请求
    ///
    /// 被限流时直接返回 `RateLimited`，不会触碰注册表或任何上游。
    /// 返回的流在被轮询时才开始上游通信；丢弃它即取消上游请求。
    pub fn handle(&self, request: &ChatRequest) -> Result<TextStream> {
        let metrics = global_metrics();
        metrics.record_request();

        if !self.limiter.check_and_record(&request.caller_address) {
            metrics.record_rate_limited();
            warn!(caller = %request.caller_address, "请求过于频繁，已拒绝");
            return Err(RelayError::RateLimited);
        }

        let adapter = self.registry.resolve(&request.provider_id);
        info!(
            caller = %request.caller_address,
            requested = %request.provider_id,
            provider = adapter.name(),
            "开始转发"
        );
        metrics.record_stream_started();

        Ok(normalize(
            adapter.generate(&request.message),
            adapter.name().to_string(),
            self.idle_timeout,
        ))
    }
}
