use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML 解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP 请求错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket 错误: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("上游 API 错误: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("上游拒绝请求: {0}")]
    Rejected(String),

    #[error("等待上游超时: {0}")]
    Timeout(String),

    #[error("请求过于频繁，请稍后再试")]
    RateLimited,

    #[error("未授权")]
    Unauthorized,

    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::InternalError(msg.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        RelayError::UpstreamError {
            status,
            message: message.into(),
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        RelayError::Rejected(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        RelayError::Timeout(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        RelayError::InvalidRequest(msg.into())
    }

    /// 被网关拦截的错误（限流、鉴权、参数），不会触达任何上游
    pub fn is_gate_rejection(&self) -> bool {
        matches!(
            self,
            RelayError::RateLimited | RelayError::Unauthorized | RelayError::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = RelayError::ConfigError("测试错误".to_string());
        assert_eq!(err.to_string(), "配置错误: 测试错误");

        let err = RelayError::upstream(404, "Not Found");
        assert_eq!(err.to_string(), "上游 API 错误: 404 - Not Found");

        let err = RelayError::timeout("60 秒内任务未完成");
        assert_eq!(err.to_string(), "等待上游超时: 60 秒内任务未完成");
    }

    #[test]
    fn test_error_conversion_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "文件未找到");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::IoError(_)));
    }

    #[test]
    fn test_error_conversion_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: RelayError = json_err.into();
        assert!(matches!(err, RelayError::JsonError(_)));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = RelayError::config("配置无效");
        assert!(matches!(err, RelayError::ConfigError(_)));
        assert_eq!(err.to_string(), "配置错误: 配置无效");

        let err = RelayError::rejected("没有可用的计算节点");
        assert!(matches!(err, RelayError::Rejected(_)));

        let err = RelayError::internal("内部错误");
        assert!(matches!(err, RelayError::InternalError(_)));
    }

    #[test]
    fn test_gate_rejection() {
        assert!(RelayError::RateLimited.is_gate_rejection());
        assert!(RelayError::Unauthorized.is_gate_rejection());
        assert!(RelayError::invalid_request("空消息").is_gate_rejection());
        assert!(!RelayError::upstream(500, "boom").is_gate_rejection());
    }
}
