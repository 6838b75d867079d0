use crate::error::RelayError;
use crate::metrics;
use crate::normalizer::TextStream;
use crate::server::AppState;
use crate::types::{ChatBody, ChatRequest, ErrorBody};
use futures_util::StreamExt;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE,
};
use hyper::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

// 流式响应体不是 Sync，统一用 UnsyncBoxBody
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// 口令请求头
pub const PASSWORD_HEADER: &str = "x-api-password";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// 处理 HTTP 请求的主路由
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Result<Response<BoxBody>, BoxError>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") | (&Method::GET, "/health") => health_check(),
        (&Method::GET, "/metrics") => metrics_endpoint(),
        (&Method::POST, "/chat") => chat(req, state, peer).await,
        (&Method::OPTIONS, _) => preflight(),
        _ => not_found(),
    };
    Ok(with_cors(response))
}

fn full(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into())
        .map_err(|e| Box::new(e) as BoxError)
        .boxed_unsync()
}

fn text_response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<BoxBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// `{"error": "..."}` 错误响应
fn error_response(status: StatusCode, message: impl Into<String>) -> Response<BoxBody> {
    let body = serde_json::to_string(&ErrorBody::new(message))
        .unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string());
    text_response(status, APPLICATION_JSON, body)
}

/// 允许任意来源跨域访问
fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, x-api-password"),
    );
    response
}

/// 健康检查端点
fn health_check() -> Response<BoxBody> {
    text_response(StatusCode::OK, TEXT_PLAIN, "OK")
}

/// 指标端点
fn metrics_endpoint() -> Response<BoxBody> {
    let body = metrics::global_metrics().export_prometheus();
    text_response(StatusCode::OK, "text/plain; version=0.0.4", body)
}

fn preflight() -> Response<BoxBody> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// 404 响应
fn not_found() -> Response<BoxBody> {
    text_response(StatusCode::NOT_FOUND, TEXT_PLAIN, "Not Found")
}

/// 网关错误对应的状态码
pub fn status_for(error: &RelayError) -> StatusCode {
    match error {
        RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
        RelayError::InvalidRequest(_) | RelayError::JsonError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 调用方地址：默认取对端地址，信任代理时取 X-Forwarded-For 的第一项
pub fn caller_address(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(address) = forwarded {
            return address.to_string();
        }
    }
    peer.ip().to_string()
}

/// 对话端点：鉴权 -> 解析请求体 -> 限流与分发 -> 流式输出
async fn chat<B>(req: Request<B>, state: Arc<AppState>, peer: SocketAddr) -> Response<BoxBody>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let supplied = req
        .headers()
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = state.gateway.authorize(supplied) {
        warn!(peer = %peer, "口令错误或缺失");
        return error_response(status_for(&e), e.to_string());
    }

    let caller = caller_address(req.headers(), peer, state.trust_forwarded_for);

    let whole_body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "读取请求体失败");
            return error_response(StatusCode::BAD_REQUEST, format!("读取请求体失败: {}", e));
        }
    };

    let body: ChatBody = match serde_json::from_slice(&whole_body) {
        Ok(body) => body,
        Err(e) => {
            let e = RelayError::from(e);
            return error_response(status_for(&e), e.to_string());
        }
    };

    // 验证请求参数
    if let Err(e) = body.validate() {
        let e = RelayError::invalid_request(e);
        return error_response(status_for(&e), e.to_string());
    }

    let request = ChatRequest::from_body(body, caller);
    match state.gateway.handle(&request) {
        Ok(stream) => stream_response(stream),
        Err(e) => {
            if !e.is_gate_rejection() {
                warn!(error = %e, "分发请求失败");
            }
            error_response(status_for(&e), e.to_string())
        }
    }
}

/// 每个片段作为一个数据帧立即写出
fn stream_response(stream: TextStream) -> Response<BoxBody> {
    let frames = stream.map(|fragment| Ok::<_, BoxError>(Frame::data(Bytes::from(fragment))));
    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no")); // 禁用 Nginx 缓冲
    response
}
