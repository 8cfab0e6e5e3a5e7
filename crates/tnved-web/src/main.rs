mod config;
mod error;
mod server;

use tnved_core::fetch::RateFetcher;
use tnved_core::pipeline::Pipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_ansi(false)
        .init();

    info!("starting tnved-web");

    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        max_upload_bytes = config.max_upload_bytes,
        source_url = %config.fetcher.source_url,
        max_attempts = config.fetcher.max_attempts,
        fetch_timeout_secs = config.fetcher.fetch_timeout.as_secs(),
        "configuration loaded"
    );

    let fetcher = RateFetcher::new(config.fetcher.clone())?;
    let app = server::router(AppState::new(Pipeline::new(fetcher)), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "server error"))?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
