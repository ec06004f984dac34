use std::sync::Arc;

use anyhow::Context;
use results_portal::{
    server::{self, AppState},
    AppConfig, HttpResultFetcher,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("could not read .env file: {e}"),
    }

    let config = AppConfig::from_env().context("loading configuration")?;
    if config.upstream.accept_invalid_certs {
        warn!(
            endpoint = %config.upstream.endpoint,
            "TLS certificate verification disabled for upstream requests"
        );
    }

    let fetcher = HttpResultFetcher::new(config.upstream.clone())
        .context("building upstream client")?;
    info!(
        endpoint = %fetcher.endpoint(),
        max_attempts = config.retry().max_attempts,
        backoff = ?config.retry().backoff,
        "results portal v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState {
        fetcher: Arc::new(fetcher),
    };
    server::serve(config.bind_addr, state).await?;
    Ok(())
}
