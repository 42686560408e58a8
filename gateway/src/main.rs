//! SQLite 发布服务
//!
//! 启动流程：
//! - 从环境变量与配置目录加载配置
//! - 注册数据库、启动 SQL 工作线程池并预热表行数
//! - 按顺序注册路由后开始监听

use common::config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "gateway";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志追踪
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    if json_logs {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }

    // 加载配置
    let config = AppConfig::load()?;
    let addr = format!("{}:{}", config.host, config.port);

    // 创建应用（数据库注册、线程池、路由）
    let app = gateway::build(config, Vec::new()).await?;

    // 启动服务
    info!(service = SERVICE_NAME, address = %addr, "启动 SQLite 发布服务");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
