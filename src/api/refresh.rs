// 批量刷新 API：校验刷新密钥后逐条替换兜底头像。
use crate::api::{method_not_allowed, with_cache_control};
use crate::auth::{extract_refresh_secret, secrets_match};
use crate::services::error::WallError;
use crate::state::AppState;
use axum::extract::{OriginalUri, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::warn;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/refresh-fallbacks",
        get(refresh_fallbacks)
            .post(refresh_fallbacks)
            .fallback(|| async { method_not_allowed("GET, POST") }),
    )
}

async fn refresh_fallbacks(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let Some(expected) = state.config.refresh_secret() else {
        return Err(WallError::config("REFRESH_SECRET not set").into_response());
    };
    let provided = extract_refresh_secret(&headers, uri.query()).unwrap_or_default();
    if !secrets_match(&provided, &expected) {
        warn!("刷新请求被拒绝: 密钥不匹配");
        return Err(WallError::auth("Unauthorized").into_response());
    }

    let summary = state
        .refresh
        .run()
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(with_cache_control(
        Json(summary).into_response(),
        "no-store",
    ))
}
