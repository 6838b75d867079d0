use crate::error::RelayError;
use crate::metrics::global_metrics;
use crate::providers::upstream::Upstream;
use crate::providers::{boxed, Decoded, FragmentStream};
use crate::Result;
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// SSE 行前缀
pub const DATA_PREFIX: &str = "data:";

/// 把字节流切成行。按字节缓冲，完整一行后再做 UTF-8 解码，
/// 这样跨网络分块的多字节字符不会被拆坏。末尾没有换行的残行也会输出。
pub fn split_lines<S, B, E>(body: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Into<RelayError> + Send,
{
    try_stream! {
        let mut body = std::pin::pin!(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::<RelayError>::into)?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield decode_line(&line);
            }
        }

        if !buffer.is_empty() {
            yield decode_line(&buffer);
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// 取出 `data:` 行的负载，去掉前缀后的一个可选空格；其他行返回 None
pub fn sse_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
        .map(|payload| payload.strip_prefix(' ').unwrap_or(payload))
}

/// 逐行协议的通用驱动：发送请求，按行解码，直到连接关闭或解码器声明结束
pub fn decode_response<D>(upstream: Arc<Upstream>, message: String, decode: D) -> FragmentStream
where
    D: Fn(&str) -> Decoded + Send + 'static,
{
    boxed(try_stream! {
        let response = upstream.send(&message).await?;
        let lines = split_lines(response.bytes_stream());
        let mut lines = std::pin::pin!(lines);

        while let Some(line) = lines.next().await {
            let line = line?;
            match decode(&line) {
                Decoded::Fragment(text) => yield text,
                Decoded::Skip => {}
                Decoded::Malformed => {
                    global_metrics().record_dropped_unit();
                    debug!(provider = %upstream.id, line = %line, "跳过无法解析的行");
                }
                Decoded::Done => break,
                Decoded::Failed(reason) => Err::<(), _>(RelayError::rejected(reason))?,
            }
        }
    })
}
