// 头像解析：凭据鉴权的 API 解析器与公开兜底解析器，统一返回 ResolutionResult。
pub mod rewrite;
pub mod twitter;
pub mod unavatar;

use async_trait::async_trait;
use serde::Serialize;

pub use rewrite::RewriteStrategy;
pub use twitter::{TwitterProvider, TwitterResolver, TwitterResolverOptions};
pub use unavatar::UnavatarResolver;

pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_EXHAUSTED: u16 = 429;
pub const STATUS_BAD_GATEWAY: u16 = 502;
pub const STATUS_TIMEOUT: u16 = 504;

/// 单次解析尝试的结果，用于决定是否继续回退并统计凭据使用。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 成功凭据在配置列表中的位置（从 1 开始）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ResolutionResult {
    pub fn success(url: impl Into<String>) -> Self {
        Self {
            ok: true,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: Some(status),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn timeout(error: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(STATUS_TIMEOUT, error)
        }
    }
}

/// 编排器依次调用的头像来源。
#[async_trait]
pub trait AvatarProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// 可轮换的凭据数量；无需凭据的来源返回 0。
    fn credential_count(&self) -> usize {
        0
    }

    async fn resolve(&self, handle: &str) -> ResolutionResult;
}
