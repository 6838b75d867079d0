use crate::error::RelayError;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 无法识别的 model 一律回落到这个提供商
    pub default_provider: String,
    pub providers: Vec<ProviderConfig>,
}

/// 服务端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// 可选的共享口令，对应请求头 `x-api-password`
    #[serde(default)]
    pub password: Option<String>,
    /// 服务自身的公网地址，配置后才会启动保活任务
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
    /// 单个片段的最长等待时间
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// 部署在反向代理之后时，用 X-Forwarded-For 的第一个地址作为调用方地址
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            password: None,
            public_url: None,
            liveness_interval_secs: default_liveness_interval(),
            idle_timeout_secs: default_idle_timeout(),
            trust_forwarded_for: false,
        }
    }
}

impl ServerConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// 限流配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: usize,
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval(),
            cleanup_threshold: default_cleanup_threshold(),
            max_age_secs: default_max_age(),
        }
    }
}

/// 上游协议族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    LineJson,
    SseDelta,
    SseText,
    Prefixed,
    OneShot,
    JobPoll,
    Duplex,
}

/// 请求体编码方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Json,
    Form,
}

/// 单个上游提供商配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub id: String,
    pub family: Family,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// 请求体模板，支持 {{message}} {{message_json}} {{model}} {{uuid}}
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub encoding: BodyEncoding,
    /// 基线模型名
    #[serde(default)]
    pub model: Option<String>,
    /// 后缀 -> 上游模型名，例如 `venice-uncensored` 中的 `uncensored`
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    // sse_delta
    #[serde(default)]
    pub content_pointer: Option<String>,

    // sse_text
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub separator: Option<String>,

    // job_poll
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
    #[serde(default)]
    pub filler: Option<String>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,

    // duplex
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl ProviderConfig {
    /// 只含必填字段的配置，其余取默认值
    pub fn new(id: impl Into<String>, family: Family, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family,
            url: url.into(),
            headers: BTreeMap::new(),
            body: serde_json::Value::Null,
            encoding: BodyEncoding::Json,
            model: None,
            variants: BTreeMap::new(),
            timeout_secs: default_request_timeout(),
            content_pointer: None,
            ignore: Vec::new(),
            separator: None,
            status_url: None,
            poll_interval_ms: None,
            job_timeout_ms: None,
            filler: None,
            stop_sequences: None,
            read_timeout_ms: None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_port() -> u16 {
    10000
}

fn default_liveness_interval() -> u64 {
    600
}

fn default_idle_timeout() -> u64 {
    180
}

fn default_min_interval() -> u64 {
    3000
}

fn default_cleanup_threshold() -> usize {
    1000
}

fn default_max_age() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    120
}

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("环境变量正则无效"));

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// 从 YAML 文本加载配置
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let content = Self::replace_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 替换配置中的环境变量 ${VAR}
    fn replace_env_vars(content: &str) -> Result<String> {
        let mut result = content.to_string();

        for cap in ENV_VAR_RE.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name).map_err(|_| {
                RelayError::config(format!("环境变量未找到: {}", var_name))
            })?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// 用进程环境变量覆盖端口、口令和公网地址
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// 覆盖逻辑，变量来源可注入
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| RelayError::config(format!("PORT 不是有效端口: {}", port)))?;
        }
        if let Some(password) = lookup("RELAY_PASSWORD").filter(|p| !p.is_empty()) {
            self.server.password = Some(password);
        }
        if let Some(url) = lookup("PUBLIC_URL").filter(|u| !u.is_empty()) {
            self.server.public_url = Some(url);
        }
        Ok(())
    }

    /// 验证配置
    fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(RelayError::config("providers 不能为空"));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(RelayError::config("provider id 不能为空"));
            }
            if !seen.insert(provider.id.to_lowercase()) {
                return Err(RelayError::config(format!("provider id 重复: {}", provider.id)));
            }
            if provider.url.is_empty() {
                return Err(RelayError::config(format!("{} 缺少 url", provider.id)));
            }
            if provider.variants.keys().any(|k| k.is_empty()) {
                return Err(RelayError::config(format!("{} 的 variants 含空后缀", provider.id)));
            }
            match provider.family {
                Family::JobPoll if provider.status_url.is_none() => {
                    return Err(RelayError::config(format!(
                        "{} 属于 job_poll，必须配置 status_url",
                        provider.id
                    )));
                }
                Family::Duplex
                    if !(provider.url.starts_with("ws://") || provider.url.starts_with("wss://")) =>
                {
                    return Err(RelayError::config(format!(
                        "{} 属于 duplex，url 必须是 ws:// 或 wss://",
                        provider.id
                    )));
                }
                _ => {}
            }
        }

        if self.find_provider(&self.default_provider).is_none() {
            return Err(RelayError::config(format!(
                "default_provider 未在 providers 中定义: {}",
                self.default_provider
            )));
        }

        Ok(())
    }

    /// 根据 id 查找提供商配置（不区分大小写）
    pub fn find_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }
}
