use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 简单的指标收集器
#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    streams_started: AtomicU64,
    rate_limited: AtomicU64,
    unauthorized: AtomicU64,
    upstream_errors: AtomicU64,
    dropped_units: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次 /chat 请求
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录已开始向调用方输出的响应流
    pub fn record_stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthorized(&self) {
        self.unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录以内联错误片段结束的响应流
    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录解码失败而被跳过的行或事件
    pub fn record_dropped_unit(&self) {
        self.dropped_units.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_units(&self) -> u64 {
        self.dropped_units.load(Ordering::Relaxed)
    }

    /// 导出 Prometheus 格式
    pub fn export_prometheus(&self) -> String {
        format!(
            "# HELP chatrelay_requests_total Total number of chat requests\n\
             # TYPE chatrelay_requests_total counter\n\
             chatrelay_requests_total {}\n\
             # HELP chatrelay_streams_started Responses that reached an adapter\n\
             # TYPE chatrelay_streams_started counter\n\
             chatrelay_streams_started {}\n\
             # HELP chatrelay_rate_limited Requests rejected by the rate limiter\n\
             # TYPE chatrelay_rate_limited counter\n\
             chatrelay_rate_limited {}\n\
             # HELP chatrelay_unauthorized Requests rejected by the password check\n\
             # TYPE chatrelay_unauthorized counter\n\
             chatrelay_unauthorized {}\n\
             # HELP chatrelay_upstream_errors Streams terminated by an inline error\n\
             # TYPE chatrelay_upstream_errors counter\n\
             chatrelay_upstream_errors {}\n\
             # HELP chatrelay_dropped_units Malformed upstream lines or events skipped\n\
             # TYPE chatrelay_dropped_units counter\n\
             chatrelay_dropped_units {}\n",
            self.total_requests.load(Ordering::Relaxed),
            self.streams_started.load(Ordering::Relaxed),
            self.rate_limited.load(Ordering::Relaxed),
            self.unauthorized.load(Ordering::Relaxed),
            self.upstream_errors.load(Ordering::Relaxed),
            self.dropped_units.load(Ordering::Relaxed)
        )
    }
}

/// 获取全局指标实例
pub fn global_metrics() -> &'static Arc<Metrics> {
    use once_cell::sync::Lazy;
    static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));
    &METRICS
}
