use crate::config::{BodyEncoding, ProviderConfig};
use crate::error::RelayError;
use crate::Result;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// 错误响应体最多读取的字节数
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// 获取全局 HTTP 客户端（连接池复用）
pub fn get_http_client() -> &'static Client {
    static CLIENT: Lazy<Client> = Lazy::new(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new())
    });
    &CLIENT
}

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(message_json|message|model|uuid|job_id)\}\}").expect("占位符正则无效")
});

/// 模板占位符的取值
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub message: &'a str,
    pub model: Option<&'a str>,
    pub job_id: Option<&'a str>,
}

/// 在一个字符串中一次性替换所有占位符，替换结果不会被再次展开
pub fn render_str(template: &str, vars: &TemplateVars<'_>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "message" => vars.message.to_string(),
            "message_json" => Value::String(vars.message.to_string()).to_string(),
            "model" => vars.model.unwrap_or_default().to_string(),
            "job_id" => vars.job_id.unwrap_or_default().to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        })
        .into_owned()
}

/// 递归渲染请求体模板
pub fn render_template(template: &Value, vars: &TemplateVars<'_>) -> Value {
    match template {
        Value::String(s) => Value::String(render_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_template(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, vars)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// 一个上游端点的请求描述，所有协议族共用
#[derive(Debug, Clone)]
pub struct Upstream {
    pub id: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub encoding: BodyEncoding,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl Upstream {
    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Self {
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: config.body.clone(),
            encoding: config.encoding,
            model: model.map(str::to_string).or_else(|| config.model.clone()),
            timeout: config.request_timeout(),
        }
    }

    fn vars<'a>(&'a self, message: &'a str) -> TemplateVars<'a> {
        TemplateVars {
            message,
            model: self.model.as_deref(),
            job_id: None,
        }
    }

    /// 渲染请求体；未配置模板时发送 `{"message": ..., "model": ...}`
    pub fn render_body(&self, message: &str) -> Value {
        let vars = self.vars(message);
        if self.body.is_null() {
            let mut body = json!({ "message": message });
            if let Some(model) = &self.model {
                body["model"] = Value::String(model.clone());
            }
            return body;
        }
        render_template(&self.body, &vars)
    }

    /// 渲染带 {{job_id}} 的轮询地址
    pub fn render_job_url(&self, template: &str, job_id: &str) -> String {
        let vars = TemplateVars {
            job_id: Some(job_id),
            ..self.vars("")
        };
        render_str(template, &vars)
    }

    fn with_headers(&self, mut builder: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.timeout(self.timeout)
    }

    /// 发送 POST 请求，不检查状态码
    pub async fn post(&self, message: &str) -> Result<Response> {
        let client = get_http_client();
        let body = self.render_body(message);

        let builder = self.with_headers(client.post(&self.url));
        let builder = match self.encoding {
            BodyEncoding::Json => builder.json(&body),
            BodyEncoding::Form => builder.form(&form_fields(&body)?),
        };

        Ok(builder.send().await?)
    }

    /// 发送 POST 请求，非 2xx 视为上游错误
    pub async fn send(&self, message: &str) -> Result<Response> {
        let response = self.post(message).await?;
        ensure_success(&self.id, response).await
    }

    /// 发送 GET 请求，非 2xx 视为上游错误
    pub async fn get(&self, url: &str) -> Result<Response> {
        let client = get_http_client();
        let response = self.with_headers(client.get(url)).send().await?;
        ensure_success(&self.id, response).await
    }
}

/// 把对象模板拍平成表单字段，非字符串值按 JSON 文本发送
fn form_fields(body: &Value) -> Result<Vec<(String, String)>> {
    let map = body
        .as_object()
        .ok_or_else(|| RelayError::config("form 编码的请求体模板必须是对象"))?;

    Ok(map
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}

/// 读取受限长度的响应体，超过上限后不再读取剩余部分
pub async fn truncated_body(response: Response) -> String {
    let mut body = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(Ok(chunk)) = body.next().await {
        let room = MAX_ERROR_BODY_BYTES - buf.len();
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buf.len() >= MAX_ERROR_BODY_BYTES {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// 检查状态码，非 2xx 转为 UpstreamError
pub async fn ensure_success(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // 只读取有限长度的错误响应体
    let error_body = truncated_body(response).await;
    Err(RelayError::upstream(
        status.as_u16(),
        format!("{}: {}", provider, error_body),
    ))
}
