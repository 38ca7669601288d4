// Twitter/X API 解析器：按凭据查询用户资料中的头像地址，支持多端点与多凭据轮换。
use super::{
    AvatarProvider, ResolutionResult, RewriteStrategy, STATUS_BAD_GATEWAY, STATUS_EXHAUSTED,
    STATUS_NOT_FOUND, STATUS_UNAUTHORIZED,
};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 请求成功但资料中没有头像字段时的失败原因。
pub const ERR_NO_PROFILE_IMAGE: &str = "no profile_image_url";

#[derive(Debug, Clone)]
pub struct TwitterResolverOptions {
    pub endpoint_hosts: Vec<String>,
    pub timeout: Option<Duration>,
    pub rewrite: RewriteStrategy,
    pub user_agent: Option<String>,
}

impl TwitterResolverOptions {
    /// 提交与批量刷新：仅首个端点，双重替换，超时交给 HTTP 客户端默认值。
    pub fn refresh(config: &Config) -> Self {
        let hosts = config.api_hosts();
        Self {
            endpoint_hosts: hosts.into_iter().take(1).collect(),
            timeout: None,
            rewrite: RewriteStrategy::DoubleReplace,
            user_agent: None,
        }
    }

    /// 单查接口：x.com/twitter.com 两个端点，整体 10 秒超时。
    pub fn lookup(config: &Config) -> Self {
        let user_agent = config.twitter.user_agent.trim();
        Self {
            endpoint_hosts: config.api_hosts(),
            timeout: Some(Duration::from_millis(config.twitter.lookup_timeout_ms.max(1))),
            rewrite: RewriteStrategy::Upgrade,
            user_agent: (!user_agent.is_empty()).then(|| user_agent.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct TwitterResolver {
    http: Client,
    options: TwitterResolverOptions,
}

impl TwitterResolver {
    pub fn new(http: Client, options: TwitterResolverOptions) -> Self {
        Self { http, options }
    }

    pub fn options(&self) -> &TwitterResolverOptions {
        &self.options
    }

    /// 使用单个凭据查询；凭据为空时直接失败，不发请求。
    pub async fn resolve_direct(&self, handle: &str, credential: &str) -> ResolutionResult {
        let credential = credential.trim();
        if credential.is_empty() {
            return ResolutionResult::failure(STATUS_UNAUTHORIZED, "missing bearer");
        }
        match self.options.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.query_hosts(handle, credential)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("X 头像查询超时 {handle}，限时 {limit:?}");
                        ResolutionResult::timeout("twitter timeout")
                    }
                }
            }
            None => self.query_hosts(handle, credential).await,
        }
    }

    /// 严格按配置顺序尝试凭据，首个成功即返回并标注其序号。
    pub async fn resolve_multi(&self, handle: &str, credentials: &[String]) -> ResolutionResult {
        for (index, credential) in credentials.iter().enumerate() {
            let mut result = self.resolve_direct(handle, credential).await;
            if result.ok {
                result.provider_index = Some(index + 1);
                return result;
            }
            debug!(
                "X API 凭据 #{} 解析 {handle} 失败: {:?}",
                index + 1,
                result.status
            );
        }
        ResolutionResult::failure(STATUS_EXHAUSTED, "all tokens failed")
    }

    async fn query_hosts(&self, handle: &str, credential: &str) -> ResolutionResult {
        let mut last = ResolutionResult::failure(STATUS_BAD_GATEWAY, "no endpoint host");
        for host in &self.options.endpoint_hosts {
            let url = format!(
                "{}/2/users/by/username/{}?user.fields=profile_image_url",
                host.trim_end_matches('/'),
                urlencoding::encode(handle)
            );
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(credential)
                .header(ACCEPT, "application/json")
                .header(CACHE_CONTROL, "no-store");
            if let Some(user_agent) = self.options.user_agent.as_deref() {
                request = request.header(USER_AGENT, user_agent);
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    warn!("X API 请求超时 {handle}: {host}");
                    return ResolutionResult::timeout("twitter timeout");
                }
                Err(err) => {
                    warn!("X API 请求失败 {handle}: {host}: {err}");
                    last = ResolutionResult::failure(STATUS_BAD_GATEWAY, "twitter unreachable");
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return self.parse_profile(handle, response).await;
            }

            warn!("X API 返回错误 {handle}: {host} {status}");
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            last = ResolutionResult {
                retry_after,
                ..ResolutionResult::failure(status.as_u16(), format!("twitter {}", status.as_u16()))
            };
            // 只有 404 与服务端错误才换下一个端点。
            if status != StatusCode::NOT_FOUND && !status.is_server_error() {
                break;
            }
        }
        last
    }

    async fn parse_profile(&self, handle: &str, response: reqwest::Response) -> ResolutionResult {
        let payload = match response.json::<Value>().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("X API 响应解析失败 {handle}: {err}");
                return ResolutionResult::failure(STATUS_BAD_GATEWAY, "invalid twitter payload");
            }
        };
        let data = payload.get("data");
        let Some(base) = data
            .and_then(|data| data.get("profile_image_url"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            info!("X API 请求成功但缺少 profile_image_url: {handle}");
            return ResolutionResult::failure(STATUS_NOT_FOUND, ERR_NO_PROFILE_IMAGE);
        };
        let user_id = data
            .and_then(|data| data.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        ResolutionResult {
            raw_url: Some(base.to_string()),
            user_id,
            ..ResolutionResult::success(self.options.rewrite.apply(base))
        }
    }
}

/// 携带凭据列表的 API 来源，供编排器按顺序调用。
pub struct TwitterProvider {
    resolver: TwitterResolver,
    credentials: Vec<String>,
}

impl TwitterProvider {
    pub fn new(resolver: TwitterResolver, credentials: Vec<String>) -> Self {
        Self {
            resolver,
            credentials,
        }
    }
}

#[async_trait]
impl AvatarProvider for TwitterProvider {
    fn name(&self) -> &'static str {
        "twitter"
    }

    fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    async fn resolve(&self, handle: &str) -> ResolutionResult {
        self.resolver.resolve_multi(handle, &self.credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_upstream;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct MockApi {
        seen_tokens: Mutex<Vec<String>>,
        status: Mutex<Option<u16>>,
        delay_ms: Mutex<u64>,
    }

    async fn mock_user(
        State(state): State<Arc<MockApi>>,
        Path(handle): Path<String>,
        headers: HeaderMap,
    ) -> Response {
        let token = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .trim_start_matches("Bearer ")
            .to_string();
        state.seen_tokens.lock().push(token.clone());
        let delay = *state.delay_ms.lock();
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let scripted = *state.status.lock();
        if let Some(status) = scripted {
            let status = AxumStatus::from_u16(status).unwrap_or(AxumStatus::BAD_GATEWAY);
            return (status, [("retry-after", "30")], "nope").into_response();
        }
        if token == "bad" {
            return (AxumStatus::UNAUTHORIZED, "unauthorized").into_response();
        }
        if handle == "noimage" {
            return Json(json!({ "data": { "id": "7", "username": handle } })).into_response();
        }
        Json(json!({
            "data": {
                "id": "42",
                "username": handle,
                "profile_image_url": format!("https://pbs.twimg.com/profile_images/1/{handle}_normal.jpg"),
            }
        }))
        .into_response()
    }

    async fn start_api(state: Arc<MockApi>) -> String {
        let app = Router::new()
            .route("/2/users/by/username/{handle}", get(mock_user))
            .with_state(state);
        mock_upstream::spawn(app).await
    }

    fn options(hosts: Vec<String>, rewrite: RewriteStrategy) -> TwitterResolverOptions {
        TwitterResolverOptions {
            endpoint_hosts: hosts,
            timeout: None,
            rewrite,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn missing_credential_fails_without_request() {
        let state = Arc::new(MockApi::default());
        let base = start_api(state.clone()).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let result = resolver.resolve_direct("foo", "  ").await;
        assert!(!result.ok);
        assert_eq!(result.status, Some(401));
        assert!(state.seen_tokens.lock().is_empty());
    }

    #[tokio::test]
    async fn success_rewrites_to_high_resolution() {
        let state = Arc::new(MockApi::default());
        let base = start_api(state.clone()).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let result = resolver.resolve_direct("foo", "t1").await;
        assert!(result.ok);
        assert_eq!(
            result.url.as_deref(),
            Some("https://pbs.twimg.com/profile_images/1/foo_400x400.jpg")
        );
        assert_eq!(
            result.raw_url.as_deref(),
            Some("https://pbs.twimg.com/profile_images/1/foo_normal.jpg")
        );
        assert_eq!(result.user_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn missing_image_field_maps_to_not_found() {
        let state = Arc::new(MockApi::default());
        let base = start_api(state).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let result = resolver.resolve_direct("noimage", "t1").await;
        assert!(!result.ok);
        assert_eq!(result.status, Some(404));
    }

    #[tokio::test]
    async fn upstream_status_is_carried_through() {
        let state = Arc::new(MockApi::default());
        *state.status.lock() = Some(429);
        let base = start_api(state).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let result = resolver.resolve_direct("foo", "t1").await;
        assert_eq!(result.status, Some(429));
        assert_eq!(result.retry_after.as_deref(), Some("30"));
    }

    #[tokio::test]
    async fn first_success_short_circuits_remaining_credentials() {
        let state = Arc::new(MockApi::default());
        let base = start_api(state.clone()).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let credentials = vec!["t1".to_string(), "t2".to_string()];
        let result = resolver.resolve_multi("foo", &credentials).await;
        assert!(result.ok);
        assert_eq!(result.provider_index, Some(1));
        assert_eq!(*state.seen_tokens.lock(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn later_credential_is_reported_by_one_based_index() {
        let state = Arc::new(MockApi::default());
        let base = start_api(state.clone()).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let credentials = vec!["bad".to_string(), "".to_string(), "t3".to_string()];
        let result = resolver.resolve_multi("foo", &credentials).await;
        assert!(result.ok);
        assert_eq!(result.provider_index, Some(3));
        assert_eq!(
            *state.seen_tokens.lock(),
            vec!["bad".to_string(), "t3".to_string()]
        );
    }

    #[tokio::test]
    async fn exhausted_credentials_report_429() {
        let state = Arc::new(MockApi::default());
        *state.status.lock() = Some(403);
        let base = start_api(state.clone()).await;
        let resolver = TwitterResolver::new(
            Client::new(),
            options(vec![base], RewriteStrategy::DoubleReplace),
        );
        let credentials = vec!["t1".to_string(), "t2".to_string()];
        let result = resolver.resolve_multi("foo", &credentials).await;
        assert!(!result.ok);
        assert_eq!(result.status, Some(429));
        assert_eq!(state.seen_tokens.lock().len(), 2);

        let empty = resolver.resolve_multi("foo", &[]).await;
        assert_eq!(empty.status, Some(429));
    }

    #[tokio::test]
    async fn second_host_is_tried_only_after_not_found_or_server_error() {
        let failing = Arc::new(MockApi::default());
        *failing.status.lock() = Some(503);
        let failing_base = start_api(failing.clone()).await;
        let healthy = Arc::new(MockApi::default());
        let healthy_base = start_api(healthy.clone()).await;

        let resolver = TwitterResolver::new(
            Client::new(),
            options(
                vec![failing_base.clone(), healthy_base.clone()],
                RewriteStrategy::Upgrade,
            ),
        );
        let result = resolver.resolve_direct("foo", "t1").await;
        assert!(result.ok);
        assert_eq!(healthy.seen_tokens.lock().len(), 1);

        *failing.status.lock() = Some(401);
        let result = resolver.resolve_direct("foo", "t1").await;
        assert_eq!(result.status, Some(401));
        assert_eq!(healthy.seen_tokens.lock().len(), 1);
    }

    #[tokio::test]
    async fn configured_timeout_maps_to_timeout_outcome() {
        let state = Arc::new(MockApi::default());
        *state.delay_ms.lock() = 500;
        let base = start_api(state).await;
        let mut opts = options(vec![base], RewriteStrategy::Upgrade);
        opts.timeout = Some(Duration::from_millis(50));
        let resolver = TwitterResolver::new(Client::new(), opts);
        let result = resolver.resolve_direct("foo", "t1").await;
        assert!(!result.ok);
        assert!(result.timed_out);
        assert_eq!(result.status, Some(504));
    }

    #[test]
    fn option_presets_follow_config() {
        let config = Config::default();
        let refresh = TwitterResolverOptions::refresh(&config);
        assert_eq!(refresh.endpoint_hosts, vec!["https://api.x.com"]);
        assert_eq!(refresh.rewrite, RewriteStrategy::DoubleReplace);
        assert!(refresh.timeout.is_none());

        let lookup = TwitterResolverOptions::lookup(&config);
        assert_eq!(lookup.endpoint_hosts.len(), 2);
        assert_eq!(lookup.timeout, Some(Duration::from_secs(10)));
        assert_eq!(lookup.user_agent.as_deref(), Some("AztecWall/1.0"));
    }
}
