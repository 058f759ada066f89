use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::{self, ctrl_c};
use tracing::info;

use museum::api::{create_router, AnalyticsInfo, AppState};
use museum::auth::AuthService;
use museum::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    museum::init_tracing();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = museum::connect_storage(&config.database).await?;
    let relay = museum::start_relay(&config.umami).await;

    let analytics = AnalyticsInfo {
        enabled: config.umami.enabled,
        url: config.umami.url.clone(),
        website_id: config.umami.website_id.clone(),
    };
    let state = Arc::new(AppState::new(storage, relay.clone(), analytics));
    let auth_service = Arc::new(AuthService::new(
        config.admin.login.clone(),
        config.admin.password.clone(),
    ));
    let app = create_router(state, auth_service, &config.cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Museum API listening on http://{}", addr);
    info!("   - public endpoints at http://{}/museum/...", addr);
    info!("   - admin endpoints at http://{}/admin/...", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");

    if let Some(relay) = relay {
        relay.shutdown(config.server.shutdown_timeout()).await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}
