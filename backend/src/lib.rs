pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod residency;
pub mod routes;
pub mod store;
pub mod test_util;
pub mod upstream;

pub use config::Config;
pub use error::GatewayError;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::ApiKeyResolver;
use crate::proxy::StreamingProxy;
use crate::residency::{ResidencyManager, ResidencyPolicy};
use crate::store::Store;
use crate::upstream::Upstream;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub resolver: ApiKeyResolver,
    pub store: Arc<Store>,
    pub upstream: Arc<dyn Upstream>,
    pub residency: Arc<ResidencyManager>,
    pub proxy: StreamingProxy,
}

impl AppState {
    pub fn new(config: Config, store: Arc<Store>, upstream: Arc<dyn Upstream>) -> Self {
        let resolver = ApiKeyResolver::new(&config.auth.master_key, store.clone());
        let residency = Arc::new(ResidencyManager::new(
            upstream.clone(),
            ResidencyPolicy::from_config(&config.models),
            config.ollama.preload_keep_alive(),
            config.models.serialize_transitions,
        ));
        let proxy = StreamingProxy::new(
            upstream.clone(),
            residency.clone(),
            store.clone(),
            config.ollama.forward_timeout(),
        );

        Self {
            config,
            resolver,
            store,
            upstream,
            residency,
            proxy,
        }
    }
}

/// Build the full router: health, admin, then the catch-all proxy.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::admin::router(state.clone()))
        .merge(routes::proxy::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
