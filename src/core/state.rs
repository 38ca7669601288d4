// 全局状态：配置、共享 HTTP 客户端、档案存储与各流水线实例。
use crate::config::Config;
use crate::services::image_proxy::ImageProxy;
use crate::services::moderation::BannedPartials;
use crate::services::pipeline::{RefreshPipeline, SubmitPipeline};
use crate::services::resolver::{
    AvatarProvider, TwitterProvider, TwitterResolver, TwitterResolverOptions, UnavatarResolver,
};
use crate::services::staleness::StalenessClassifier;
use crate::storage::{build_profile_store, ProfileStore, SqliteProfileStore};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ProfileStore>,
    /// 启动时解析出的凭据列表，顺序即轮换顺序。
    pub credentials: Vec<String>,
    pub submit: SubmitPipeline,
    pub refresh: RefreshPipeline,
    pub lookup: TwitterResolver,
    pub proxy: ImageProxy,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let store = init_store(&config)?;
        Self::with_store(config, store)
    }

    /// 使用外部注入的存储构建状态，便于测试替换为内存实现。
    pub fn with_store(config: Config, store: Arc<dyn ProfileStore>) -> Result<Self> {
        let http = build_http_client(&config)?;
        let credentials = config.bearer_tokens();
        if credentials.is_empty() {
            warn!("未配置 TWITTER_BEARER 凭据，提交将直接走公开兜底解析，批量刷新不可用");
        } else {
            info!("已加载 {} 个 X API 凭据", credentials.len());
        }

        let refresh_resolver =
            TwitterResolver::new(http.clone(), TwitterResolverOptions::refresh(&config));
        let twitter: Arc<dyn AvatarProvider> = Arc::new(TwitterProvider::new(
            refresh_resolver,
            credentials.clone(),
        ));
        let unavatar: Arc<dyn AvatarProvider> =
            Arc::new(UnavatarResolver::new(http.clone(), &config.unavatar.base_url));

        let submit = SubmitPipeline::new(
            Arc::new(BannedPartials::new(&config.moderation.banned_partials)),
            vec![twitter.clone(), unavatar],
            store.clone(),
        );
        let refresh = RefreshPipeline::new(
            twitter,
            store.clone(),
            StalenessClassifier::new(&config.proxy.deployment_domain),
            Duration::from_millis(config.refresh.delay_ms),
        );
        let lookup = TwitterResolver::new(http.clone(), TwitterResolverOptions::lookup(&config));
        let proxy = ImageProxy::new(
            http,
            Duration::from_millis(config.proxy.timeout_ms.max(1)),
            &config.proxy.user_agent,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            credentials,
            submit,
            refresh,
            lookup,
            proxy,
        })
    }
}

fn build_http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_s.max(1)))
        .connect_timeout(Duration::from_secs(config.http.connect_timeout_s.max(1)))
        .build()
        .context("构建 HTTP 客户端失败")
}

fn init_store(config: &Config) -> Result<Arc<dyn ProfileStore>> {
    let backend = config.storage.backend.trim().to_lowercase();
    match backend.as_str() {
        "postgres" | "postgresql" | "pg" => init_store_strict(config).map_err(|err| {
            anyhow!("Postgres 初始化失败: {err}。请检查 PostgreSQL 配置，或将 storage.backend 改为 sqlite/auto。")
        }),
        "auto" => init_store_auto(config),
        _ => init_store_strict(config),
    }
}

fn init_store_strict(config: &Config) -> Result<Arc<dyn ProfileStore>> {
    let store = build_profile_store(&config.storage)?;
    store.ensure_initialized()?;
    info!("档案存储已就绪: {}", store.backend_name());
    Ok(store)
}

fn init_store_auto(config: &Config) -> Result<Arc<dyn ProfileStore>> {
    match init_store_strict(config) {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!("Postgres 初始化失败，已回退到 SQLite: {err}");
            let sqlite = Arc::new(SqliteProfileStore::new(config.storage.db_path.clone()));
            sqlite.ensure_initialized()?;
            Ok(sqlite)
        }
    }
}
