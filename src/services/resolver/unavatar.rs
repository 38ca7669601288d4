// 公开兜底解析：无需凭据，返回地址原样使用。
use super::{AvatarProvider, ResolutionResult, STATUS_BAD_GATEWAY, STATUS_NOT_FOUND};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

/// 服务自带的灰色占位图文件名。
const SERVICE_PLACEHOLDER_MARKER: &str = "fallback.png";

#[derive(Clone)]
pub struct UnavatarResolver {
    http: Client,
    base_url: String,
}

impl UnavatarResolver {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub async fn resolve_fallback(&self, handle: &str) -> ResolutionResult {
        let url = format!(
            "{}/twitter/{}?json",
            self.base_url,
            urlencoding::encode(handle)
        );
        let response = match self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!("unavatar 请求超时: {handle}");
                return ResolutionResult::timeout("unavatar timeout");
            }
            Err(err) => {
                warn!("unavatar 请求失败 {handle}: {err}");
                return ResolutionResult::failure(STATUS_BAD_GATEWAY, "unavatar unreachable");
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("unavatar 返回错误 {handle}: {status}");
            return ResolutionResult::failure(status.as_u16(), format!("unavatar {}", status.as_u16()));
        }

        let payload = match response.json::<Value>().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("unavatar 响应解析失败 {handle}: {err}");
                return ResolutionResult::failure(STATUS_BAD_GATEWAY, "invalid unavatar payload");
            }
        };
        match payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(url) if !url.contains(SERVICE_PLACEHOLDER_MARKER) => {
                info!("已通过 unavatar 解析 {handle} 的头像");
                ResolutionResult::success(url)
            }
            _ => {
                info!("unavatar 返回占位图，跳过: {handle}");
                ResolutionResult::failure(STATUS_NOT_FOUND, "unavatar placeholder")
            }
        }
    }
}

#[async_trait]
impl AvatarProvider for UnavatarResolver {
    fn name(&self) -> &'static str {
        "unavatar"
    }

    async fn resolve(&self, handle: &str) -> ResolutionResult {
        self.resolve_fallback(handle).await
    }
}
