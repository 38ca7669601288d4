// 图片代理 API：`/api/img?u=`，仅允许 GET/HEAD。
use crate::api::{method_not_allowed, query_param};
use crate::services::image_proxy::validate_target;
use crate::state::AppState;
use axum::extract::{RawQuery, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/img", any(proxy_image))
}

async fn proxy_image(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Result<Response, Response> {
    if method != Method::GET && method != Method::HEAD {
        return Err(method_not_allowed("GET, HEAD"));
    }
    let target = query_param(query.as_deref(), "u");
    let target = validate_target(target.as_deref()).map_err(IntoResponse::into_response)?;
    state
        .proxy
        .fetch(method, target)
        .await
        .map_err(IntoResponse::into_response)
}
