pub mod duplex;
pub mod job_poll;
pub mod line_json;
pub mod lines;
pub mod one_shot;
pub mod prefixed;
pub mod registry;
pub mod sse_delta;
pub mod sse_text;
pub mod upstream;

use crate::config::{Family, ProviderConfig};
use crate::Result;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// 惰性的文本片段序列：轮询时才发生网络 I/O，丢弃即释放连接
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// 固定片段流的类型，让 `try_stream!` 的错误类型可以被推断
pub(crate) fn boxed<S>(stream: S) -> FragmentStream
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    Box::pin(stream)
}

/// Adapter trait - 每个上游协议族实现一次
pub trait Adapter: Send + Sync {
    /// 提供商标识，用于日志
    fn name(&self) -> &str;

    /// 把一条消息变成片段序列；序列有限且不可重启
    fn generate(&self, message: &str) -> FragmentStream;
}

/// 单行（或单个事件）的解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// 一个要输出的片段
    Fragment(String),
    /// 合法但不含正文
    Skip,
    /// 无法解析，计数后跳过
    Malformed,
    /// 上游声明结束
    Done,
    /// 上游在流内报告的失败
    Failed(String),
}

/// 按协议族构造适配器；`model` 覆盖配置中的基线模型
pub fn build_adapter(config: &ProviderConfig, model: Option<&str>) -> Arc<dyn Adapter> {
    match config.family {
        Family::LineJson => Arc::new(line_json::LineJsonAdapter::from_config(config, model)),
        Family::SseDelta => Arc::new(sse_delta::SseDeltaAdapter::from_config(config, model)),
        Family::SseText => Arc::new(sse_text::SseTextAdapter::from_config(config, model)),
        Family::Prefixed => Arc::new(prefixed::PrefixedAdapter::from_config(config, model)),
        Family::OneShot => Arc::new(one_shot::OneShotAdapter::from_config(config, model)),
        Family::JobPoll => Arc::new(job_poll::JobPollAdapter::from_config(config, model)),
        Family::Duplex => Arc::new(duplex::DuplexAdapter::from_config(config, model)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_adapter_uses_provider_id_as_name() {
        for family in [
            Family::LineJson,
            Family::SseDelta,
            Family::SseText,
            Family::Prefixed,
            Family::OneShot,
            Family::JobPoll,
            Family::Duplex,
        ] {
            let config = ProviderConfig::new("upstream-x", family, "ws://127.0.0.1:1/");
            let adapter = build_adapter(&config, None);
            assert_eq!(adapter.name(), "upstream-x");
        }
    }
}
