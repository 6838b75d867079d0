use crate::config::ProviderConfig;
use crate::providers::lines::{decode_response, sse_payload};
use crate::providers::upstream::Upstream;
use crate::providers::{Adapter, Decoded, FragmentStream};
use std::collections::HashSet;
use std::sync::Arc;

/// 默认丢弃的非正文负载：结束标记、服务端错误横幅、占位符
pub const DEFAULT_IGNORED: &[&str] = &["[DONE]", "[ERROR]", "Internal Server Error", "undefined", "null"];

/// 默认追加在每个片段后的分隔符
pub const DEFAULT_SEPARATOR: &str = " ";

/// 过滤 SSE 原始文本行
#[derive(Debug, Clone)]
pub struct TextFilter {
    ignored: HashSet<String>,
    separator: String,
}

impl TextFilter {
    pub fn new<I, S>(extra_ignored: I, separator: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ignored: HashSet<String> = DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect();
        ignored.extend(extra_ignored.into_iter().map(Into::into));
        Self {
            ignored,
            separator: separator.unwrap_or(DEFAULT_SEPARATOR).to_string(),
        }
    }

    /// 空行和忽略集合中的负载被丢弃，其余原样输出并追加分隔符
    pub fn decode_line(&self, line: &str) -> Decoded {
        let Some(payload) = sse_payload(line) else {
            return Decoded::Skip;
        };

        let trimmed = payload.trim();
        if trimmed.is_empty() || self.ignored.contains(trimmed) {
            return Decoded::Skip;
        }

        Decoded::Fragment(format!("{}{}", payload, self.separator))
    }
}

impl Default for TextFilter {
    fn default() -> Self {
        Self::new(Vec::<String>::new(), None)
    }
}

/// SSE 帧内的原始文本协议
pub struct SseTextAdapter {
    upstream: Arc<Upstream>,
    filter: Arc<TextFilter>,
}

impl SseTextAdapter {
    pub fn new(upstream: Upstream, filter: TextFilter) -> Self {
        Self {
            upstream: Arc::new(upstream),
            filter: Arc::new(filter),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        let filter = TextFilter::new(config.ignore.iter().cloned(), config.separator.as_deref());
        Self::new(Upstream::from_config(config, model), filter)
    }
}

impl Adapter for SseTextAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        let filter = Arc::clone(&self.filter);
        decode_response(Arc::clone(&self.upstream), message.to_string(), move |line| {
            filter.decode_line(line)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use futures_util::StreamExt;
    use mockito::Server;

    #[test]
    fn test_drops_sentinels_exactly() {
        let filter = TextFilter::default();
        for sentinel in DEFAULT_IGNORED {
            assert_eq!(filter.decode_line(&format!("data: {}", sentinel)), Decoded::Skip);
        }
        assert_eq!(filter.decode_line("data: "), Decoded::Skip);
        assert_eq!(filter.decode_line("data:    "), Decoded::Skip);
        assert_eq!(filter.decode_line("id: 7"), Decoded::Skip);
    }

    #[test]
    fn test_emits_other_lines_with_separator() {
        let filter = TextFilter::default();
        assert_eq!(
            filter.decode_line("data: Hello"),
            Decoded::Fragment("Hello ".to_string())
        );
        // 只是包含哨兵的行不会被丢弃
        assert_eq!(
            filter.decode_line("data: null pointer"),
            Decoded::Fragment("null pointer ".to_string())
        );
        assert_eq!(
            filter.decode_line("data: [DONE]!"),
            Decoded::Fragment("[DONE]! ".to_string())
        );
    }

    #[test]
    fn test_extra_ignored_and_custom_separator() {
        let filter = TextFilter::new(["<think>"], Some("\n"));
        assert_eq!(filter.decode_line("data: <think>"), Decoded::Skip);
        assert_eq!(
            filter.decode_line("data: line"),
            Decoded::Fragment("line\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_generate_filters_stream() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: Hello\n\n",
                "data: undefined\n\n",
                "data: world\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let config = ProviderConfig::new("phind", Family::SseText, format!("{}/stream", server.url()));
        let adapter = SseTextAdapter::from_config(&config, None);
        let text: String = adapter
            .generate("hi")
            .map(|f| f.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();

        assert_eq!(text, "Hello world ");
        mock.assert_async().await;
    }
}
