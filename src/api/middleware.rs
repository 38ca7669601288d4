// 全局中间件：CORS 规则与 panic 兜底。
use crate::config::CorsConfig;
use crate::services::error::WallError;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use std::any::Any as PanicPayload;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

/// 单项 CORS 配置的解析结果。
#[derive(Debug, PartialEq)]
enum CorsRule<T> {
    Wildcard,
    Only(Vec<T>),
    /// 列表中没有可识别的值，保持 tower-http 默认（不放行）。
    Closed,
}

// 未配置或包含 `*` 时放行全部。
fn cors_rule<T: FromStr>(values: Option<&Vec<String>>) -> CorsRule<T> {
    let Some(values) = values else {
        return CorsRule::Wildcard;
    };
    if values.iter().any(|value| value.trim() == "*") {
        return CorsRule::Wildcard;
    }
    let parsed: Vec<T> = values
        .iter()
        .filter_map(|value| value.trim().parse().ok())
        .collect();
    if parsed.is_empty() {
        CorsRule::Closed
    } else {
        CorsRule::Only(parsed)
    }
}

pub fn build_cors(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new();
    cors = match cors_rule::<HeaderValue>(config.allow_origins.as_ref()) {
        CorsRule::Wildcard => cors.allow_origin(Any),
        CorsRule::Only(origins) => cors.allow_origin(origins),
        CorsRule::Closed => cors,
    };
    cors = match cors_rule::<Method>(config.allow_methods.as_ref()) {
        CorsRule::Wildcard => cors.allow_methods(Any),
        CorsRule::Only(methods) => cors.allow_methods(methods),
        CorsRule::Closed => cors,
    };
    cors = match cors_rule::<HeaderName>(config.allow_headers.as_ref()) {
        CorsRule::Wildcard => cors.allow_headers(Any),
        CorsRule::Only(headers) => cors.allow_headers(headers),
        CorsRule::Closed => cors,
    };
    cors.allow_credentials(config.allow_credentials.unwrap_or(false))
}

/// handler panic 时记录日志并返回统一的 500 错误体。
pub async fn catch_panic(request: Request<Body>, next: Next) -> Response {
    let route = format!("{} {}", request.method(), request.uri().path());
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            error!("处理 {route} 时发生 panic: {}", describe_panic(payload.as_ref()));
            WallError::new("INTERNAL_ERROR", 500, "Server error").into_response()
        }
    }
}

fn describe_panic(payload: &(dyn PanicPayload + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message;
    }
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .unwrap_or("unknown panic")
}
