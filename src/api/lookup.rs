// 单查 API：`/api/twitter-pfp?u=`，用首个凭据直接查询 X 的高清头像。
use crate::api::{method_not_allowed, query_param, with_cache_control};
use crate::services::error::WallError;
use crate::services::resolver::twitter::ERR_NO_PROFILE_IMAGE;
use crate::services::resolver::{ResolutionResult, STATUS_BAD_GATEWAY, STATUS_EXHAUSTED};
use crate::state::AppState;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};

pub const LOOKUP_CACHE_CONTROL: &str = "s-maxage=21600, stale-while-revalidate=86400";
const DEFAULT_RETRY_AFTER: &str = "60";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/twitter-pfp", any(twitter_pfp))
}

fn handle_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").ok())
        .as_ref()
}

/// 去掉前导 `@` 后校验 X 用户名格式（1-15 位字母数字下划线）。
pub fn parse_lookup_handle(raw: Option<&str>) -> Option<String> {
    let handle = raw.unwrap_or_default().trim().trim_start_matches('@');
    handle_regex()
        .is_some_and(|pattern| pattern.is_match(handle))
        .then(|| handle.to_string())
}

async fn twitter_pfp(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Result<Response, Response> {
    if method != Method::GET {
        return Err(method_not_allowed("GET"));
    }
    let Some(credential) = state.credentials.first() else {
        return Err(WallError::config("TWITTER_BEARER not set").into_response());
    };
    let raw_handle = query_param(query.as_deref(), "u");
    let Some(handle) = parse_lookup_handle(raw_handle.as_deref()) else {
        return Err(WallError::validation("Invalid handle").into_response());
    };

    let result = state.lookup.resolve_direct(&handle, credential).await;
    if !result.ok {
        return Err(lookup_failure(result));
    }
    let payload = json!({
        "handle": handle,
        "url": result.url,
        "raw": result.raw_url,
        "user_id": result.user_id,
    });
    Ok(with_cache_control(
        Json(payload).into_response(),
        LOOKUP_CACHE_CONTROL,
    ))
}

fn lookup_failure(result: ResolutionResult) -> Response {
    if result.timed_out {
        return WallError::upstream_timeout("X API timeout").into_response();
    }
    let status = result.status.unwrap_or(STATUS_BAD_GATEWAY);
    if status == STATUS_EXHAUSTED {
        let retry_after = result
            .retry_after
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RETRY_AFTER.to_string());
        let mut response = WallError::rate_limited("Rate limited by X API")
            .with_detail(json!({ "retryAfter": retry_after }))
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }
    if result.error.as_deref() == Some(ERR_NO_PROFILE_IMAGE) {
        return WallError::not_found("No profile_image_url").into_response();
    }
    WallError::upstream_status(status, format!("Upstream {status}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_handles_strip_at_and_enforce_format() {
        assert_eq!(parse_lookup_handle(Some(" @@Jack_01 ")).as_deref(), Some("Jack_01"));
        assert_eq!(parse_lookup_handle(Some("a".repeat(15).as_str())).map(|h| h.len()), Some(15));
        assert!(parse_lookup_handle(Some(&"a".repeat(16))).is_none());
        assert!(parse_lookup_handle(Some("bad-handle")).is_none());
        assert!(parse_lookup_handle(Some("@")).is_none());
        assert!(parse_lookup_handle(None).is_none());
    }

    #[test]
    fn failures_map_to_distinct_statuses() {
        let timeout = lookup_failure(ResolutionResult::timeout("twitter timeout"));
        assert_eq!(timeout.status().as_u16(), 504);

        let limited = lookup_failure(ResolutionResult::failure(429, "twitter 429"));
        assert_eq!(limited.status().as_u16(), 429);
        assert_eq!(limited.headers()[header::RETRY_AFTER], DEFAULT_RETRY_AFTER);

        let missing = lookup_failure(ResolutionResult::failure(404, ERR_NO_PROFILE_IMAGE));
        assert_eq!(missing.status().as_u16(), 404);

        let forbidden = lookup_failure(ResolutionResult::failure(403, "twitter 403"));
        assert_eq!(forbidden.status().as_u16(), 403);
    }
}
