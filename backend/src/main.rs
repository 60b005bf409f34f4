use std::sync::Arc;

use tokio::net::TcpListener;

use gatekeeper_backend::catalog::refresh_catalog;
use gatekeeper_backend::logging;
use gatekeeper_backend::store::Store;
use gatekeeper_backend::upstream::OllamaClient;
use gatekeeper_backend::{build_app, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    logging::init_tracing(&config.logging.level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        ollama = %config.ollama.base_url,
        pinned = ?config.models.pinned,
        mount = %config.proxy.mount,
        "Starting Ollama gatekeeper"
    );

    let store = Arc::new(Store::new(&config.database.url)?);
    let upstream = Arc::new(OllamaClient::new(&config.ollama)?);
    let addr = config.listen_addr();
    let state = Arc::new(AppState::new(config, store, upstream));

    let pinned = state.residency.pin_all().await;
    tracing::info!(
        pinned,
        configured = state.residency.policy().pinned().len(),
        "Pinned models loaded"
    );

    if let Err(e) =
        refresh_catalog(state.upstream.as_ref(), state.residency.policy(), &state.store).await
    {
        tracing::warn!(error = %e, "Initial catalog refresh failed");
    }

    let app = build_app(state);

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
