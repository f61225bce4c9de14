//! 主应用程序入口
//!
//! 启动私信中继服务：加载配置、连接数据库并执行迁移、组装各层组件，然后启动 Axum 服务。

use std::sync::Arc;

use application::SystemClock;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, AppStateDependencies};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitized(), "configuration loaded");

    let infrastructure = Infrastructure::connect(config.database.clone().into()).await?;

    let state = AppState::new(AppStateDependencies {
        user_repository: infrastructure.user_repository(),
        message_repository: infrastructure.message_repository(),
        clock: Arc::new(SystemClock),
        relay: config.relay.clone(),
    });

    // 上次进程退出时残留的在线标记在这里被纠正
    match state.presence.recompute().await {
        Ok(changes) => tracing::info!(
            went_offline = changes.went_offline.len(),
            "startup presence reconciliation finished"
        ),
        Err(err) => tracing::error!(error = %err, "startup presence reconciliation failed"),
    }

    let app = router(state);
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(%address, "relay server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
