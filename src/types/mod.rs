use serde::{Deserialize, Serialize};

/// 入站请求体 `{ "message": ..., "model": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: String,
    /// 提供商标识，缺省时使用默认提供商
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatBody {
    /// 验证请求参数
    pub fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("message 不能为空".to_string());
        }
        Ok(())
    }
}

/// 一次对话请求，处理完响应流后即丢弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    pub provider_id: String,
    pub caller_address: String,
}

impl ChatRequest {
    pub fn new(
        message: impl Into<String>,
        provider_id: impl Into<String>,
        caller_address: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            provider_id: provider_id.into(),
            caller_address: caller_address.into(),
        }
    }

    /// 由请求体和调用方地址构造；未指定 model 时 provider_id 为空，交给注册表回落
    pub fn from_body(body: ChatBody, caller_address: impl Into<String>) -> Self {
        Self {
            message: body.message,
            provider_id: body.model.unwrap_or_default(),
            caller_address: caller_address.into(),
        }
    }
}

/// 网关拦截时返回的 JSON 错误体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
