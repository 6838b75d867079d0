use crate::providers::upstream::get_http_client;
use crate::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 默认保活间隔
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// `<public_url>/health`
pub fn health_url(public_url: &str) -> String {
    format!("{}/health", public_url.trim_end_matches('/'))
}

/// 请求一次健康检查端点
pub async fn ping_once(url: &str) -> Result<u16> {
    let response = get_http_client()
        .get(url)
        .timeout(PING_TIMEOUT)
        .send()
        .await?;
    Ok(response.status().as_u16())
}

/// 启动保活任务：每隔 `interval` 请求一次自身的健康检查端点，
/// 失败只记录日志。收到关闭信号（或发送端被丢弃）后退出。
pub fn spawn(public_url: &str, interval: Duration, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
    let url = health_url(public_url);

    tokio::spawn(async move {
        info!(url = %url, interval_secs = interval.as_secs(), "保活任务已启动");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            match ping_once(&url).await {
                Ok(status) if (200..300).contains(&status) => debug!(status, "保活请求成功"),
                Ok(status) => warn!(status, "保活请求返回异常状态"),
                Err(e) => warn!(error = %e, "保活请求失败"),
            }
        }

        info!("保活任务已停止");
    })
}
