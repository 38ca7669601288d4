// API 路由汇总入口，按领域拆分。
pub mod errors;
pub mod img;
pub mod lookup;
pub mod middleware;
pub mod profiles;
pub mod refresh;

use crate::services::error::WallError;
use crate::state::AppState;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(profiles::router())
        .merge(refresh::router())
        .merge(img::router())
        .merge(lookup::router())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// 405 JSON 错误，并在 `Allow` 头中列出可用方法。
pub(crate) fn method_not_allowed(allow: &'static str) -> Response {
    let mut response = WallError::method_not_allowed("Method not allowed").into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

/// 从原始查询串取首个同名参数；解析在方法校验之后进行，畸形查询不会触发框架默认错误。
pub(crate) fn query_param(raw: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

pub(crate) fn with_cache_control(mut response: Response, value: &'static str) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(value));
    response
}
