//! 异步任务协议：提交后按固定间隔轮询状态。
//!
//! 状态流转 `submitted -> polling -> {done | rejected | timed_out}`。
//! 未完成的每次轮询都输出一个填充片段，让下游连接保持活跃。

use crate::config::ProviderConfig;
use crate::error::RelayError;
use crate::metrics::global_metrics;
use crate::providers::upstream::{truncated_body, Upstream};
use crate::providers::{boxed, Adapter, FragmentStream};
use crate::Result;
use async_stream::try_stream;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);
/// 零宽空格，不影响最终文本
pub const DEFAULT_FILLER: &str = "\u{200B}";
pub const DEFAULT_STOP_SEQUENCES: &[&str] = &["\nUser:", "\nYou:"];

/// 轮询策略
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// 含 {{job_id}} 的状态地址模板
    pub status_url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub filler: String,
    pub stop_sequences: Vec<String>,
}

impl PollPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            status_url: config.status_url.clone().unwrap_or_default(),
            interval: config
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            timeout: config
                .job_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_JOB_TIMEOUT),
            filler: config
                .filler
                .clone()
                .unwrap_or_else(|| DEFAULT_FILLER.to_string()),
            stop_sequences: config.stop_sequences.clone().unwrap_or_else(|| {
                DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(default)]
    done: bool,
    #[serde(default = "default_true")]
    is_possible: bool,
    #[serde(default)]
    faulted: bool,
    #[serde(default)]
    generations: Vec<Generation>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    #[serde(default)]
    text: String,
}

fn default_true() -> bool {
    true
}

/// 单次轮询的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(String),
    Rejected(String),
}

/// 判定一次轮询响应；无法解析的响应按未完成处理
pub fn classify(body: &str, stop_sequences: &[String]) -> PollOutcome {
    let status: JobStatus = match serde_json::from_str(body) {
        Ok(status) => status,
        Err(_) => {
            global_metrics().record_dropped_unit();
            return PollOutcome::Pending;
        }
    };

    if !status.is_possible {
        return PollOutcome::Rejected("当前没有可以处理该请求的节点".to_string());
    }
    if status.faulted {
        return PollOutcome::Rejected("上游任务执行失败".to_string());
    }
    if status.done {
        let text = status
            .generations
            .into_iter()
            .next()
            .map(|g| g.text)
            .unwrap_or_default();
        return PollOutcome::Done(clean_result(&text, stop_sequences));
    }
    PollOutcome::Pending
}

/// 在第一个停止序列处截断并去掉首尾空白
pub fn clean_result(text: &str, stop_sequences: &[String]) -> String {
    let cut = stop_sequences
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..cut].trim().to_string()
}

fn job_timeout(job: &str, policy: &PollPolicy) -> RelayError {
    RelayError::timeout(format!("任务 {} 在 {} 秒内未完成", job, policy.timeout.as_secs()))
}

/// 在任务截止时间前完成一次上游交互
async fn within_budget<T, F>(deadline: Instant, policy: &PollPolicy, job: &str, exchange: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout_at(deadline, exchange)
        .await
        .unwrap_or_else(|_| Err(job_timeout(job, policy)))
}

/// 提交任务；只有 202 才算被接受
async fn submit(upstream: &Upstream, message: &str) -> Result<Submission> {
    let response = upstream.post(message).await?;
    let status = response.status();
    if status != StatusCode::ACCEPTED {
        let body = truncated_body(response).await;
        return Err(RelayError::upstream(
            status.as_u16(),
            format!("{} 未接受任务: {}", upstream.id, body),
        ));
    }
    Ok(response.json().await?)
}

async fn poll_status(upstream: &Upstream, status_url: &str) -> Result<String> {
    Ok(upstream.get(status_url).await?.text().await?)
}

/// 提交/轮询任务协议
pub struct JobPollAdapter {
    upstream: Arc<Upstream>,
    policy: Arc<PollPolicy>,
}

impl JobPollAdapter {
    pub fn new(upstream: Upstream, policy: PollPolicy) -> Self {
        Self {
            upstream: Arc::new(upstream),
            policy: Arc::new(policy),
        }
    }

    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        Self::new(Upstream::from_config(config, model), PollPolicy::from_config(config))
    }
}

impl Adapter for JobPollAdapter {
    fn name(&self) -> &str {
        &self.upstream.id
    }

    fn generate(&self, message: &str) -> FragmentStream {
        let upstream = Arc::clone(&self.upstream);
        let policy = Arc::clone(&self.policy);
        let message = message.to_string();

        boxed(try_stream! {
            // 提交与每次轮询都计入同一个预算
            let deadline = Instant::now() + policy.timeout;

            // submitted
            let submission = within_budget(deadline, &policy, &upstream.id, submit(&upstream, &message)).await?;
            info!(provider = %upstream.id, job_id = %submission.id, "任务已提交");
            let status_url = upstream.render_job_url(&policy.status_url, &submission.id);

            // polling
            let mut polls: u32 = 0;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(policy.interval.min(remaining)).await;
                if Instant::now() >= deadline {
                    Err::<(), _>(job_timeout(&submission.id, &policy))?;
                }

                polls += 1;
                let body = within_budget(deadline, &policy, &submission.id, poll_status(&upstream, &status_url)).await?;
                match classify(&body, &policy.stop_sequences) {
                    PollOutcome::Pending => {
                        debug!(provider = %upstream.id, job_id = %submission.id, polls, "任务尚未完成");
                        yield policy.filler.clone();
                    }
                    PollOutcome::Done(text) => {
                        info!(provider = %upstream.id, job_id = %submission.id, polls, "任务完成");
                        yield text;
                        break;
                    }
                    PollOutcome::Rejected(reason) => {
                        Err::<(), _>(RelayError::rejected(reason))?;
                    }
                }
            }
        })
    }
}
