use crate::config::ProviderConfig;
use crate::providers::lines::decode_response;
use crate::providers::upstream::Upstream;
use crate::providers::{Adapter, Decoded, FragmentStream};
use std::sync::Arc;

/// 携带助手正文的通道
const TEXT_CHANNEL: &str = "0";
/// 携带错误信息的通道
const ERROR_CHANNEL: &str = "3";

/// `<通道>:<负载>` 多路复用行协议
pub struct PrefixedAdapter {
    upstream: Arc<Upstream>,
}

impl PrefixedAdapter {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        Self::new(Upstream::from_config(config, model))
    }
}

impl Adapter for PrefixedAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        decode_response(Arc::clone(&self.upstream), message.to_string(), decode_line)
    }
}

/// 去掉负载外层的引号；能按 JSON 字符串解码时顺带还原转义
fn unquote(payload: &str) -> String {
    if payload.len() >= 2 && payload.starts_with('"') && payload.ends_with('"') {
        serde_json::from_str::<String>(payload)
            .unwrap_or_else(|_| payload[1..payload.len() - 1].to_string())
    } else {
        payload.to_string()
    }
}

pub fn decode_line(line: &str) -> Decoded {
    if line.trim().is_empty() {
        return Decoded::Skip;
    }

    let Some((channel, payload)) = line.split_once(':') else {
        return Decoded::Malformed;
    };
    if channel.is_empty() || !channel.chars().all(|c| c.is_ascii_digit()) {
        return Decoded::Malformed;
    }

    match channel {
        TEXT_CHANNEL => Decoded::Fragment(unquote(payload)),
        ERROR_CHANNEL => Decoded::Failed(unquote(payload)),
        _ => Decoded::Skip,
    }
}
