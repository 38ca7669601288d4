// 档案 API：提交 handle 与列出照片墙。
use crate::api::{method_not_allowed, with_cache_control};
use crate::services::error::WallError;
use crate::state::AppState;
use crate::storage::{list_profiles, ProfileRecord};
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

pub const LIST_CACHE_CONTROL: &str = "s-maxage=120, stale-while-revalidate=1800";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/submit",
            post(submit).fallback(|| async { method_not_allowed("POST") }),
        )
        .route(
            "/api/list",
            get(list).fallback(|| async { method_not_allowed("GET") }),
        )
}

#[derive(Debug, Default, Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    handle: Option<String>,
}

async fn submit(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, Response> {
    // 请求体无法解析时按缺少 handle 处理。
    let request = serde_json::from_slice::<SubmitRequest>(&body).unwrap_or_default();
    let profile = state
        .submit
        .submit(request.handle.as_deref())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(json!({ "ok": true, "profile": profile })).into_response())
}

async fn list(State(state): State<Arc<AppState>>) -> Result<Response, Response> {
    let mut profiles = list_profiles(&state.store).await.map_err(|err| {
        error!("读取头像墙档案失败: {err:#}");
        WallError::store(err.to_string()).into_response()
    })?;
    sort_newest_first(&mut profiles);
    Ok(with_cache_control(
        Json(profiles).into_response(),
        LIST_CACHE_CONTROL,
    ))
}

/// 按创建时间倒序，同一时间保持存储顺序。
pub fn sort_newest_first(profiles: &mut [ProfileRecord]) {
    profiles.sort_by(|left, right| right.created_at.cmp(&left.created_at));
}
