use crate::metrics::global_metrics;
use crate::providers::FragmentStream;
use async_stream::stream;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// 归一化后的输出：只有文本，失败以内联文本结束
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// 内联错误片段
pub fn error_fragment(description: impl std::fmt::Display) -> String {
    format!("Error: {}", description)
}

/// 把适配器的片段流包装成统一契约：
/// 有限、只向前，第一个错误变成结尾的 `Error: ...` 片段，
/// 每次拉取最多等待 `idle_timeout`，永远不向外抛错。
pub fn normalize(mut inner: FragmentStream, provider: String, idle_timeout: Duration) -> TextStream {
    Box::pin(stream! {
        let mut delivered = 0usize;
        loop {
            let next = match tokio::time::timeout(idle_timeout, inner.next()).await {
                Ok(next) => next,
                Err(_) => {
                    global_metrics().record_upstream_error();
                    warn!(provider = %provider, delivered, "等待上游片段超时");
                    yield error_fragment(format!("上游在 {} 秒内没有响应", idle_timeout.as_secs()));
                    break;
                }
            };

            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    delivered += 1;
                    yield fragment;
                }
                Some(Err(e)) => {
                    global_metrics().record_upstream_error();
                    warn!(provider = %provider, delivered, error = %e, "上游失败，以内联错误结束");
                    yield error_fragment(&e);
                    break;
                }
                None => {
                    debug!(provider = %provider, delivered, "响应流结束");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use futures_util::stream;

    fn fragments(items: Vec<crate::Result<String>>) -> FragmentStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_passes_fragments_in_order() {
        let inner = fragments(vec![Ok("He".into()), Ok("llo".into()), Ok(" world".into())]);
        let out: Vec<String> = normalize(inner, "venice".into(), Duration::from_secs(1))
            .collect()
            .await;
        assert_eq!(out, vec!["He", "llo", " world"]);
    }

    #[tokio::test]
    async fn test_drops_empty_fragments() {
        let inner = fragments(vec![Ok(String::new()), Ok("a".into()), Ok(String::new())]);
        let out: Vec<String> = normalize(inner, "p".into(), Duration::from_secs(1))
            .collect()
            .await;
        assert_eq!(out, vec!["a"]);
    }

    #[tokio::test]
    async fn test_error_becomes_trailing_fragment() {
        let inner = fragments(vec![
            Ok("partial".into()),
            Err(RelayError::upstream(503, "busy")),
            Ok("never".into()),
        ]);
        let out: Vec<String> = normalize(inner, "p".into(), Duration::from_secs(1))
            .collect()
            .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "partial");
        assert!(out[1].starts_with("Error: "));
        assert!(out[1].contains("503"));
    }

    #[tokio::test]
    async fn test_idle_timeout_terminates() {
        let inner: FragmentStream = Box::pin(
            stream::iter(vec![Ok("first".to_string())]).chain(stream::pending()),
        );
        let started = std::time::Instant::now();
        let out: Vec<String> = normalize(inner, "p".into(), Duration::from_millis(100))
            .collect()
            .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "first");
        assert!(out[1].starts_with("Error: "));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_stream_yields_nothing() {
        let out: Vec<String> = normalize(fragments(vec![]), "p".into(), Duration::from_secs(1))
            .collect()
            .await;
        assert!(out.is_empty());
    }
}
