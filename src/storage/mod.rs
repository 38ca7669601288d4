// 存储模块：头像墙档案的持久化抽象，按 handle 唯一并以 upsert 写入。

mod memory;
mod postgres;
mod sqlite;

use crate::config::StorageConfig;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use memory::MemoryProfileStore;
pub use postgres::PostgresProfileStore;
pub use sqlite::SqliteProfileStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub handle: String,
    pub twitter_url: String,
    pub website: String,
    pub pfp_url: String,
    pub created_at: DateTime<Utc>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// 以规范化后的 handle 构建新档案，主页链接固定指向 twitter.com。
    pub fn new(handle: &str, pfp_url: &str) -> Self {
        let now = Utc::now();
        let profile_url = format!("https://twitter.com/{handle}");
        Self {
            id: Uuid::new_v4().to_string(),
            handle: handle.to_string(),
            twitter_url: profile_url.clone(),
            website: profile_url,
            pfp_url: pfp_url.to_string(),
            created_at: now,
            last_refreshed: Some(now),
        }
    }
}

/// 档案存储抽象。每次调用各自原子，冲突时以最后写入为准。
///
/// `upsert_by_handle` 在 handle 已存在时保留原有的 `id` 与 `created_at`，
/// 其余字段以传入记录为准；返回写入后的完整记录。
pub trait ProfileStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn ensure_initialized(&self) -> Result<()>;

    /// 按写入顺序返回全部档案。
    fn list_all(&self) -> Result<Vec<ProfileRecord>>;

    fn upsert_by_handle(&self, record: &ProfileRecord) -> Result<ProfileRecord>;
}

/// 根据 backend 配置构建存储实现。
pub fn build_profile_store(config: &StorageConfig) -> Result<Arc<dyn ProfileStore>> {
    let backend = config.backend.trim().to_lowercase();
    let backend = if backend.is_empty() {
        "sqlite".to_string()
    } else {
        backend
    };
    match backend.as_str() {
        "memory" | "inmemory" => Ok(Arc::new(MemoryProfileStore::new())),
        "sqlite" | "default" => Ok(Arc::new(SqliteProfileStore::new(
            config.db_path.trim().to_string(),
        ))),
        "postgres" | "postgresql" | "pg" | "auto" => Ok(Arc::new(PostgresProfileStore::new(
            config.postgres.dsn.clone(),
            config.postgres.connect_timeout_s,
            config.postgres.pool_size,
        )?)),
        other => Err(anyhow!("未知存储后端: {other}")),
    }
}

/// 在阻塞线程池中读取全部档案，避免同步 I/O 占用异步工作线程。
pub async fn list_profiles(store: &Arc<dyn ProfileStore>) -> Result<Vec<ProfileRecord>> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.list_all())
        .await
        .context("档案读取任务异常退出")?
}

pub async fn upsert_profile(
    store: &Arc<dyn ProfileStore>,
    record: ProfileRecord,
) -> Result<ProfileRecord> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.upsert_by_handle(&record))
        .await
        .context("档案写入任务异常退出")?
}

pub(crate) fn ts_to_datetime(ts: f64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis((ts * 1000.0).round() as i64).unwrap_or_default()
}

pub(crate) fn datetime_to_ts(value: &DateTime<Utc>) -> f64 {
    value.timestamp_millis() as f64 / 1000.0
}
