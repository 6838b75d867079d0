use crate::config::ProviderConfig;
use crate::providers::lines::decode_response;
use crate::providers::upstream::Upstream;
use crate::providers::{Adapter, Decoded, FragmentStream};
use serde::Deserialize;
use std::sync::Arc;

/// 每行一个 JSON 事件，例如 `{"kind":"content","content":"He"}`
#[derive(Debug, Deserialize)]
struct LineEvent {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// 逐行 JSON 事件协议
pub struct LineJsonAdapter {
    upstream: Arc<Upstream>,
}

impl LineJsonAdapter {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        Self::new(Upstream::from_config(config, model))
    }
}

impl Adapter for LineJsonAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        decode_response(Arc::clone(&self.upstream), message.to_string(), decode_line)
    }
}

/// 解码一行；带 kind 字段时只有 `content` 类事件携带正文
pub fn decode_line(line: &str) -> Decoded {
    let line = line.trim();
    if line.is_empty() {
        return Decoded::Skip;
    }

    let event: LineEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(_) => return Decoded::Malformed,
    };

    if event.kind.as_deref().is_some_and(|kind| kind != "content") {
        return Decoded::Skip;
    }

    match event.content {
        Some(text) => Decoded::Fragment(text),
        None => Decoded::Skip,
    }
}
