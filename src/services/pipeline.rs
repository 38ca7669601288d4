// 解析编排：提交流水线（多来源顺序回退）与批量刷新流水线（逐条、限速）。
use crate::services::error::WallError;
use crate::services::moderation::HandleFilter;
use crate::services::resolver::AvatarProvider;
use crate::services::staleness::StalenessClassifier;
use crate::storage::{list_profiles, upsert_profile, ProfileRecord, ProfileStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const MSG_MISSING_AT: &str = "Please enter your @handle (must start with @)";
pub const MSG_INVALID_HANDLE: &str = "Invalid handle";
pub const MSG_BANNED: &str = "This handle is not allowed";
pub const MSG_NOT_FOUND: &str = "X handle not found. Please enter a valid X username.";
pub const MSG_NO_TOKENS: &str = "No TWITTER_BEARER tokens configured";

pub fn starts_with_at(raw: &str) -> bool {
    raw.trim().starts_with('@')
}

/// 去掉首尾空白与前导 `@`，统一小写。
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_lowercase()
}

pub struct SubmitPipeline {
    filter: Arc<dyn HandleFilter>,
    providers: Vec<Arc<dyn AvatarProvider>>,
    store: Arc<dyn ProfileStore>,
}

impl SubmitPipeline {
    /// providers 的顺序即回退顺序。
    pub fn new(
        filter: Arc<dyn HandleFilter>,
        providers: Vec<Arc<dyn AvatarProvider>>,
        store: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            filter,
            providers,
            store,
        }
    }

    pub async fn submit(&self, raw: Option<&str>) -> Result<ProfileRecord, WallError> {
        let raw = raw.unwrap_or_default();
        if !starts_with_at(raw) {
            return Err(WallError::validation(MSG_MISSING_AT));
        }
        let handle = normalize_handle(raw);
        if handle.is_empty() {
            return Err(WallError::validation(MSG_INVALID_HANDLE));
        }
        if self.filter.is_banned(&handle) {
            info!("拒绝被屏蔽的 handle 提交: {handle}");
            return Err(WallError::validation(MSG_BANNED));
        }

        let Some(pfp_url) = self.resolve(&handle).await else {
            info!("未找到有效的 X 账号: {handle}");
            return Err(WallError::handle_not_found(MSG_NOT_FOUND));
        };

        let record = ProfileRecord::new(&handle, &pfp_url);
        upsert_profile(&self.store, record).await.map_err(|err| {
            warn!("写入档案失败 {handle}: {err:#}");
            WallError::store(err.to_string())
        })
    }

    async fn resolve(&self, handle: &str) -> Option<String> {
        for provider in &self.providers {
            let result = provider.resolve(handle).await;
            if result.ok {
                if let Some(url) = result.url {
                    info!("{handle} 头像解析成功，来源 {}", provider.name());
                    return Some(url);
                }
            }
            info!(
                "{} 解析 {handle} 失败 (status {:?})，尝试下一个来源",
                provider.name(),
                result.status
            );
        }
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub ok: bool,
    pub scanned: usize,
    pub refreshed: usize,
    pub kept: usize,
    pub errors: usize,
    pub token_usage: Vec<usize>,
    pub refreshed_handles: Vec<String>,
}

pub struct RefreshPipeline {
    provider: Arc<dyn AvatarProvider>,
    store: Arc<dyn ProfileStore>,
    classifier: StalenessClassifier,
    delay: Duration,
}

impl RefreshPipeline {
    pub fn new(
        provider: Arc<dyn AvatarProvider>,
        store: Arc<dyn ProfileStore>,
        classifier: StalenessClassifier,
        delay: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            classifier,
            delay,
        }
    }

    /// 逐条处理：只对判定为兜底图的记录调用解析器，相邻两次调用之间固定等待。
    pub async fn run(&self) -> Result<RefreshSummary, WallError> {
        let credential_count = self.provider.credential_count();
        if credential_count == 0 {
            return Err(WallError::config(MSG_NO_TOKENS));
        }
        let records = list_profiles(&self.store).await.map_err(|err| {
            warn!("刷新时读取档案失败: {err:#}");
            WallError::store(err.to_string())
        })?;

        let mut summary = RefreshSummary {
            ok: true,
            token_usage: vec![0; credential_count],
            ..RefreshSummary::default()
        };
        let mut attempted = false;

        for record in records {
            summary.scanned += 1;
            let handle = record.handle.trim().to_lowercase();
            if handle.is_empty() || !self.classifier.is_fallback(&record.pfp_url) {
                summary.kept += 1;
                continue;
            }

            if attempted && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempted = true;

            let result = self.provider.resolve(&handle).await;
            let Some(url) = result.url.filter(|_| result.ok) else {
                summary.kept += 1;
                continue;
            };

            let updated = ProfileRecord {
                pfp_url: url,
                last_refreshed: Some(Utc::now()),
                ..record
            };
            match upsert_profile(&self.store, updated).await {
                Ok(_) => {
                    summary.refreshed += 1;
                    summary.refreshed_handles.push(handle);
                    if let Some(slot) = result
                        .provider_index
                        .and_then(|index| index.checked_sub(1))
                        .and_then(|index| summary.token_usage.get_mut(index))
                    {
                        *slot += 1;
                    }
                }
                Err(err) => {
                    warn!("刷新写回失败 {handle}: {err:#}");
                    summary.errors += 1;
                }
            }
        }

        info!(
            "兜底头像刷新完成: scanned={} refreshed={} kept={} errors={}",
            summary.scanned, summary.refreshed, summary.kept, summary.errors
        );
        Ok(summary)
    }
}
