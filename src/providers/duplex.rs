use crate::config::ProviderConfig;
use crate::error::RelayError;
use crate::metrics::global_metrics;
use crate::providers::upstream::Upstream;
use crate::providers::{boxed, Adapter, Decoded, FragmentStream};
use async_stream::try_stream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// 上游推送的事件
#[derive(Debug, Deserialize)]
struct DuplexEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// 解码一个文本帧
pub fn decode_event(frame: &str) -> Decoded {
    let event: DuplexEvent = match serde_json::from_str(frame) {
        Ok(event) => event,
        Err(_) => return Decoded::Malformed,
    };

    match event.kind.as_str() {
        "done" => Decoded::Done,
        "text" | "content" | "partial" => match event.text.or(event.content) {
            Some(text) => Decoded::Fragment(text),
            None => Decoded::Skip,
        },
        "error" => Decoded::Failed(
            event
                .message
                .unwrap_or_else(|| "上游推送了错误事件".to_string()),
        ),
        _ => Decoded::Skip,
    }
}

/// WebSocket 双向事件流协议：发送一个事件，读取直到 done 或读取超时
pub struct DuplexAdapter {
    upstream: Arc<Upstream>,
    read_timeout: Duration,
}

impl DuplexAdapter {
    pub fn new(upstream: Upstream, read_timeout: Duration) -> Self {
        Self {
            upstream: Arc::new(upstream),
            read_timeout,
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        let read_timeout = config
            .read_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READ_TIMEOUT);
        Self::new(Upstream::from_config(config, model), read_timeout)
    }
}

impl Adapter for DuplexAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        let upstream = Arc::clone(&self.upstream);
        let read_timeout = self.read_timeout;
        let message = message.to_string();

        boxed(try_stream! {
            let mut request = upstream.url.as_str().into_client_request()?;
            for (name, value) in &upstream.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| RelayError::config(format!("无效的请求头 {}: {}", name, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| RelayError::config(format!("无效的请求头值: {}", e)))?;
                request.headers_mut().insert(name, value);
            }

            let (socket, _) = tokio::time::timeout(upstream.timeout, connect_async(request))
                .await
                .map_err(|_| RelayError::timeout(format!("连接 {} 超时", upstream.id)))??;
            let (mut write, mut read) = socket.split();

            let event = upstream.render_body(&message);
            write.send(Message::Text(event.to_string().into())).await?;

            loop {
                let next = match tokio::time::timeout(read_timeout, read.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(provider = %upstream.id, "读取超时，结束本次会话");
                        break;
                    }
                };
                let Some(frame) = next else {
                    break;
                };

                match frame? {
                    Message::Text(text) => match decode_event(text.as_str()) {
                        Decoded::Fragment(fragment) => yield fragment,
                        Decoded::Skip => {}
                        Decoded::Malformed => {
                            global_metrics().record_dropped_unit();
                            debug!(provider = %upstream.id, "跳过无法解析的事件");
                        }
                        Decoded::Done => break,
                        Decoded::Failed(reason) => Err::<(), _>(RelayError::rejected(reason))?,
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            let _ = write.close().await;
        })
    }
}
