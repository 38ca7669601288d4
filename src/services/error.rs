// 业务错误：错误码 + HTTP 状态 + 面向用户的消息，由 API 层统一转成响应。
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct WallError {
    code: &'static str,
    status: u16,
    message: String,
    detail: Option<Value>,
}

impl WallError {
    pub fn new(code: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", 400, message)
    }

    pub fn handle_not_found(message: impl Into<String>) -> Self {
        Self::new("HANDLE_NOT_FOUND", 400, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", 401, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", 404, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new("METHOD_NOT_ALLOWED", 405, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("RATE_LIMITED", 429, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new("CONFIG_MISSING", 500, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new("STORE_ERROR", 500, message)
    }

    /// 上游失败统一报 502，已知的上游状态码放进 detail。
    pub fn upstream(message: impl Into<String>, upstream_status: Option<u16>) -> Self {
        let error = Self::new("UPSTREAM_ERROR", 502, message);
        match upstream_status {
            Some(status) => error.with_detail(json!({ "upstream_status": status })),
            None => error,
        }
    }

    /// 透传上游状态码（单查接口沿用上游的 4xx/5xx）。
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        let status = if (400..=599).contains(&status) {
            status
        } else {
            502
        };
        Self::new("UPSTREAM_ERROR", status, message)
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new("UPSTREAM_TIMEOUT", 504, message)
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }
}

impl std::fmt::Display for WallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WallError {}
