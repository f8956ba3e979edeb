use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use brokerage_api::app::{self, services::AppServices};
use brokerage_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    brokerage_observability::init(config.log_format);

    let services = Arc::new(
        AppServices::from_config(&config)
            .await
            .context("failed to initialise stores")?,
    );
    let app = app::build_app(services.clone(), &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain queued audit entries before exiting.
    services.audit.flush().await;
    tracing::info!(stats = ?services.audit.stats(), "audit writer drained");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
