use crate::config::ProviderConfig;
use crate::providers::lines::{decode_response, sse_payload};
use crate::providers::upstream::Upstream;
use crate::providers::{Adapter, Decoded, FragmentStream};
use serde_json::Value;
use std::sync::Arc;

/// OpenAI 风格增量的默认位置
pub const DEFAULT_CONTENT_POINTER: &str = "/choices/0/delta/content";

/// 流结束标记
pub const DONE_SENTINEL: &str = "[DONE]";

/// SSE 帧内的 JSON 增量协议
pub struct SseDeltaAdapter {
    upstream: Arc<Upstream>,
    content_pointer: Arc<str>,
}

impl SseDeltaAdapter {
    pub fn new(upstream: Upstream, content_pointer: impl Into<Arc<str>>) -> Self {
        Self {
            upstream: Arc::new(upstream),
            content_pointer: content_pointer.into(),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        let pointer = config
            .content_pointer
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_POINTER);
        Self::new(Upstream::from_config(config, model), pointer)
    }
}

impl Adapter for SseDeltaAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        let pointer = Arc::clone(&self.content_pointer);
        decode_response(Arc::clone(&self.upstream), message.to_string(), move |line| {
            decode_line(line, &pointer)
        })
    }
}

/// 解码一行 SSE；只有 `data:` 行是候选
pub fn decode_line(line: &str, content_pointer: &str) -> Decoded {
    let Some(payload) = sse_payload(line) else {
        return Decoded::Skip;
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Decoded::Done;
    }
    if payload.is_empty() {
        return Decoded::Skip;
    }

    let event: Value = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(_) => return Decoded::Malformed,
    };

    match event.pointer(content_pointer).and_then(Value::as_str) {
        Some(text) => Decoded::Fragment(text.to_string()),
        None => Decoded::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Family;
    use futures_util::StreamExt;
    use mockito::Server;

    fn decode(line: &str) -> Decoded {
        decode_line(line, DEFAULT_CONTENT_POINTER)
    }

    #[test]
    fn test_decode_delta_content() {
        assert_eq!(
            decode(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            Decoded::Fragment("Hi".to_string())
        );
        assert_eq!(
            decode(r#"data:{"choices":[{"delta":{"content":"!"}}]}"#),
            Decoded::Fragment("!".to_string())
        );
    }

    #[test]
    fn test_decode_done_and_non_data_lines() {
        assert_eq!(decode("data: [DONE]"), Decoded::Done);
        assert_eq!(decode("event: ping"), Decoded::Skip);
        assert_eq!(decode(": keep-alive"), Decoded::Skip);
        assert_eq!(decode(""), Decoded::Skip);
        assert_eq!(decode("data: "), Decoded::Skip);
    }

    #[test]
    fn test_decode_missing_field_and_malformed() {
        assert_eq!(decode(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), Decoded::Skip);
        assert_eq!(decode(r#"data: {"choices":[]}"#), Decoded::Skip);
        assert_eq!(decode("data: {truncated"), Decoded::Malformed);
    }

    #[test]
    fn test_decode_custom_pointer() {
        assert_eq!(
            decode_line(r#"data: {"delta":{"text":"abc"}}"#, "/delta/text"),
            Decoded::Fragment("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_generate_stops_at_done() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {oops\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            ))
            .create_async()
            .await;

        let config = ProviderConfig::new(
            "blackbox",
            Family::SseDelta,
            format!("{}/v1/chat/completions", server.url()),
        );
        let adapter = SseDeltaAdapter::from_config(&config, None);
        let fragments: Vec<String> = adapter
            .generate("hi")
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["Hel", "lo"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_upstream_error_is_single_err_item() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("overloaded")
            .create_async()
            .await;

        let config = ProviderConfig::new(
            "blackbox",
            Family::SseDelta,
            format!("{}/v1/chat/completions", server.url()),
        );
        let adapter = SseDeltaAdapter::from_config(&config, None);
        let items: Vec<_> = adapter.generate("hi").collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        mock.assert_async().await;
    }
}
