// 统一错误响应：`{ ok:false, error, detail }`，附带 trace id 与错误码响应头。
use crate::services::error::WallError;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub(crate) const TRACE_HEADER: &str = "x-trace-id";
pub(crate) const ERROR_CODE_HEADER: &str = "x-error-code";

#[derive(Debug, Clone)]
pub(crate) struct ErrorMeta {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub hint: String,
    pub trace_id: String,
    pub timestamp: f64,
}

impl ErrorMeta {
    fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("code".to_string(), json!(self.code));
        map.insert("message".to_string(), json!(self.message));
        map.insert("status".to_string(), json!(self.status));
        map.insert("hint".to_string(), json!(self.hint));
        map.insert("trace_id".to_string(), json!(self.trace_id));
        map.insert("timestamp".to_string(), json!(self.timestamp));
        map
    }
}

pub(crate) fn build_error_meta(
    status: StatusCode,
    code: Option<&str>,
    message: impl Into<String>,
    hint: Option<&str>,
) -> ErrorMeta {
    let message = message.into();
    let code = code
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_error_code(status))
        .to_string();
    let hint = hint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| hint_for_error_code(&code))
        .unwrap_or_else(|| default_hint(status))
        .to_string();
    ErrorMeta {
        code,
        message,
        status: status.as_u16(),
        hint,
        trace_id: format!("err_{}", Uuid::new_v4().simple()),
        timestamp: now_unix_seconds(),
    }
}

pub(crate) fn hint_for_error_code(code: &str) -> Option<&'static str> {
    let normalized = code.trim().to_ascii_uppercase();
    match normalized.as_str() {
        "INVALID_JSON" => Some("Send valid JSON payload encoded in UTF-8."),
        "INVALID_REQUEST" => Some("Check required fields and payload schema before retrying."),
        "HANDLE_NOT_FOUND" => Some("Double-check the X username and submit again."),
        "UNAUTHORIZED" => Some("Check authentication credentials and permission scope."),
        "RATE_LIMITED" => Some("Retry later or reduce request frequency."),
        "METHOD_NOT_ALLOWED" => Some("Use one of the methods listed in the Allow header."),
        "CONFIG_MISSING" => Some("Set the required credentials in config or environment."),
        "STORE_ERROR" => Some("Retry later or contact support with trace_id."),
        "UPSTREAM_ERROR" => Some("The upstream service rejected the request; retry later."),
        "UPSTREAM_TIMEOUT" => Some("Upstream dependency timed out; retry later."),
        _ => None,
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    error_response_with_detail(status, None, message, None, None)
}

/// `detail` 为对象时与元信息合并，元信息字段优先。
pub fn error_response_with_detail(
    status: StatusCode,
    code: Option<&str>,
    message: impl Into<String>,
    hint: Option<&str>,
    detail: Option<Value>,
) -> Response {
    let meta = build_error_meta(status, code, message, hint);
    let message = meta.message.clone();
    let trace_id = meta.trace_id.clone();
    let code = meta.code.clone();
    let detail = build_detail_payload(meta, detail);
    let payload = json!({
        "ok": false,
        "error": message,
        "detail": detail,
    });

    let mut response = (status, Json(payload)).into_response();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&code) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(ERROR_CODE_HEADER), value);
    }
    response
}

pub fn wall_error_response(error: &WallError) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response_with_detail(
        status,
        Some(error.code()),
        error.message(),
        None,
        error.detail().cloned(),
    )
}

impl IntoResponse for WallError {
    fn into_response(self) -> Response {
        wall_error_response(&self)
    }
}

fn build_detail_payload(meta: ErrorMeta, detail: Option<Value>) -> Value {
    let mut map = meta.into_map();
    match detail {
        Some(Value::Object(extra)) => {
            for (key, value) in extra {
                map.entry(key).or_insert(value);
            }
        }
        Some(value) => {
            map.insert("detail".to_string(), value);
        }
        None => {}
    }
    Value::Object(map)
}

fn default_error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
        StatusCode::TOO_MANY_REQUESTS => "RATE_LIMITED",
        StatusCode::BAD_GATEWAY => "UPSTREAM_ERROR",
        StatusCode::GATEWAY_TIMEOUT => "UPSTREAM_TIMEOUT",
        _ if status.is_server_error() => "INTERNAL_ERROR",
        _ => "REQUEST_ERROR",
    }
}

fn default_hint(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Verify request parameters and payload format.",
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            "Check authentication credentials and permission scope."
        }
        StatusCode::NOT_FOUND => "Verify requested resource path or identifier.",
        StatusCode::TOO_MANY_REQUESTS => "Retry later or reduce request frequency.",
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            "Service may be warming up or upstream dependency timed out."
        }
        _ if status.is_server_error() => "Retry later or contact support with trace_id.",
        _ => "Inspect request and try again.",
    }
}

fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}
