use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::signal;
use tracing::{info, warn};

use crate::config::{AppConfig, TlsConfig};
use crate::database::create_sqlite_pool;
use crate::routes::{api::AppState, create_routes};
use crate::services::{SqlAuthService, TokenManager};

/// 构建应用：连接数据库、初始化表结构和管理员账号、组装路由
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let pool = create_sqlite_pool(&config.sql)
        .await
        .with_context(|| format!("failed to open database {}", config.sql.url))?;

    let auth = SqlAuthService::new(pool, config.sql.admin.clone());
    auth.open().await.context("failed to initialise database")?;

    let tokens = TokenManager::new(&config.jwt, &config.cookie, config.tls().is_some());
    let state = AppState::new(auth, tokens);

    Ok(create_routes(state, &config.app))
}

/// 启动服务器，收到 Ctrl+C 或 SIGTERM 后优雅退出
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let app = build_app(&config).await?;
    let addr = config.socket_addr()?;

    match config.tls() {
        Some(tls) => serve_tls(app, addr, tls).await,
        None => {
            info!("Starting server on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            Ok(())
        }
    }
}

async fn serve_tls(app: Router, addr: std::net::SocketAddr, tls: &TlsConfig) -> anyhow::Result<()> {
    let (Some(certfile), Some(keyfile)) = (tls.certfile_path(), tls.keyfile_path()) else {
        anyhow::bail!("app.tls.certfile and app.tls.keyfile are required when TLS is enabled");
    };
    let rustls = RustlsConfig::from_pem_file(&certfile, &keyfile)
        .await
        .with_context(|| format!("failed to load TLS files {}", certfile.display()))?;

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Starting server on https://{}", addr);
    axum_server::bind_rustls(addr, rustls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutting down via Ctrl+C"),
        _ = terminate => info!("Shutting down via SIGTERM"),
    }
}
