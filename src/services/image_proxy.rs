// 图片代理：白名单校验、unavatar 地址规范化、限时拉取并流式回传。
use crate::services::error::WallError;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{error, warn};
use url::Url;

pub const ALLOWED_HOSTS: [&str; 4] = [
    "pbs.twimg.com",
    "abs.twimg.com",
    "unavatar.io",
    "images.weserv.nl",
];
pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*;q=0.8,*/*;q=0.5";
pub const IMAGE_CACHE_CONTROL: &str = "s-maxage=86400, stale-while-revalidate=604800";
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";
const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".webp", ".avif"];

/// 校验 `u` 参数并返回实际要拉取的地址（unavatar 已规范化）。
pub fn validate_target(raw: Option<&str>) -> Result<Url, WallError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(WallError::validation("missing url"));
    }
    let url = Url::parse(raw).map_err(|_| WallError::validation("invalid url"))?;
    if url.scheme() != "https" {
        return Err(WallError::validation("https only"));
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if !ALLOWED_HOSTS.contains(&host.as_str()) {
        return Err(WallError::validation("host not allowed"));
    }
    if host == "unavatar.io" {
        return Ok(normalize_unavatar(url));
    }
    Ok(url)
}

/// 无图片后缀时补 `.jpg`，并关闭 unavatar 自带的占位图。
pub fn normalize_unavatar(mut url: Url) -> Url {
    let path = url.path().to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        let next = format!("{}.jpg", url.path());
        url.set_path(&next);
    }
    if !url.query_pairs().any(|(key, _)| key == "fallback") {
        url.query_pairs_mut().append_pair("fallback", "false");
    }
    url
}

#[derive(Clone)]
pub struct ImageProxy {
    http: Client,
    timeout: Duration,
    user_agent: String,
}

impl ImageProxy {
    pub fn new(http: Client, timeout: Duration, user_agent: &str) -> Self {
        Self {
            http,
            timeout,
            user_agent: user_agent.to_string(),
        }
    }

    /// 超时只覆盖到响应头返回为止，响应体直接流式透传。
    pub async fn fetch(&self, method: Method, target: Url) -> Result<Response<Body>, WallError> {
        let is_head = method == Method::HEAD;
        let request = self
            .http
            .request(method, target.as_str())
            .header(header::USER_AGENT, self.user_agent.as_str())
            .header(header::ACCEPT, IMAGE_ACCEPT)
            .header(header::CACHE_CONTROL, "no-store")
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                warn!("图片代理上游超时: {}", target.host_str().unwrap_or("-"));
                return Err(WallError::upstream_timeout("upstream timeout"));
            }
            Ok(Err(err)) if err.is_timeout() => {
                warn!("图片代理上游超时: {err}");
                return Err(WallError::upstream_timeout("upstream timeout"));
            }
            Ok(Err(err)) => {
                warn!("图片代理请求上游失败: {err}");
                return Err(WallError::upstream("upstream error", None));
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            warn!("图片代理上游返回 {status}: {}", target.path());
            return Err(WallError::upstream("upstream error", Some(status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        let content_length = response.headers().get(header::CONTENT_LENGTH).cloned();

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
            .header(header::CACHE_CONTROL, IMAGE_CACHE_CONTROL);
        if let Some(length) = content_length {
            builder = builder.header(header::CONTENT_LENGTH, length);
        }
        let body = if is_head {
            Body::empty()
        } else {
            Body::from_stream(response.bytes_stream())
        };
        builder.body(body).map_err(|err| {
            error!("构建图片代理响应失败: {err}");
            WallError::upstream("upstream error", None)
        })
    }
}
