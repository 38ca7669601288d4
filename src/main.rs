// Rust 入口：加载配置、初始化存储与日志，挂载 API 路由与静态资源。
use axum::middleware::from_fn;
use axum::Router;
use pfpwall_server::api::middleware::{build_cors, catch_panic};
use pfpwall_server::build_router;
use pfpwall_server::config::{load_config, Config};
use pfpwall_server::shutdown::shutdown_signal;
use pfpwall_server::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_tracing(&config);
    let static_dir = config.server.static_dir.clone();
    let addr = bind_address(&config);
    let cors = build_cors(&config.cors);
    // 存储初始化包含阻塞 IO，放到阻塞线程池执行。
    let state = Arc::new(tokio::task::spawn_blocking(move || AppState::new(config)).await??);

    let app = build_router(state);
    let app = mount_static(app, &static_dir);
    let app = app
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(catch_panic));

    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("照片墙服务已启动: http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        warn!("服务退出异常: {err}");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_level = config.observability.log_level.trim();
    let default_level = if default_level.is_empty() {
        "info".to_string()
    } else {
        default_level.to_lowercase()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    if config
        .observability
        .log_format
        .trim()
        .eq_ignore_ascii_case("json")
    {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn bind_address(config: &Config) -> String {
    // 保留环境变量覆盖，便于容器化部署。
    let host = std::env::var("PFPWALL_HOST").unwrap_or_else(|_| config.server.host.clone());
    let port = std::env::var("PFPWALL_PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(config.server.port);
    format!("{host}:{port}")
}

fn mount_static(app: Router, dir: &str) -> Router {
    let dir = dir.trim();
    if dir.is_empty() {
        return app;
    }
    let path = PathBuf::from(dir);
    if path.exists() {
        // 目录存在时才挂载前端页面。
        info!("挂载静态资源目录: {}", path.display());
        app.fallback_service(ServeDir::new(path).append_index_html_on_directories(true))
    } else {
        app
    }
}
