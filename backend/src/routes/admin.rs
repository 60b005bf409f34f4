//! Admin API routes. All of them require the master key.
//!
//! Provides:
//! - Key issuance (`POST /admin/keys`)
//! - Usage dashboard (`GET /admin/stats`)
//! - Explicit model preload (`POST /admin/preload`)
//! - Installed model catalog (`GET /api/available_models`)

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::keys;
use crate::catalog::refresh_catalog;
use crate::error::{GatewayError, Result};
use crate::models::catalog::CatalogEntry;
use crate::models::usage::DashboardStats;
use crate::residency::ResidencyClass;
use crate::AppState;

/// Most recent usage records a single stats call may return.
const MAX_RECENT_LIMIT: u32 = 500;

/// Middleware that lets only the master identity through.
async fn require_master(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match state.resolver.authenticate(request.headers()) {
        Ok(identity) if identity.is_master() => next.run(request).await,
        Ok(_) => GatewayError::Forbidden("Admin access requires the master key").into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| GatewayError::BadRequest(e.body_text()))
}

fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(params)| params)
        .map_err(|e| GatewayError::BadRequest(e.body_text()))
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::BadRequest(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Issued key. The token is only ever shown here.
#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// POST /admin/keys - Issue a new API key
async fn create_key(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<Json<CreateKeyResponse>> {
    let request = json_body(payload)?;
    let name = required("name", &request.name)?;
    let email = required("email", &request.email)?;

    let token = keys::generate_token();
    let key = state
        .store
        .create_api_key(&name, &email, &keys::hash_token(&token))?;

    Ok(Json(CreateKeyResponse {
        id: key.id,
        name: key.name,
        email: key.email,
        token,
        created_at: key.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub limit: Option<u32>,
}

/// GET /admin/stats - Usage aggregates per key plus recent records
async fn stats(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<DashboardStats>> {
    let query = query_params(query)?;
    let limit = query
        .limit
        .unwrap_or(state.config.dashboard.recent_limit)
        .min(MAX_RECENT_LIMIT);
    Ok(Json(state.store.dashboard_stats(limit)?))
}

#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct PreloadResponse {
    pub model: String,
    pub residency: ResidencyClass,
    pub status: &'static str,
    pub evicted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /admin/preload - Make room for a model and load it now
async fn preload(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<PreloadRequest>, JsonRejection>,
) -> Result<Response> {
    let request = json_body(payload)?;
    let model = required("model", &request.model)?;

    let outcome = state.residency.preload(&model).await;
    let (status, label, message) = match &outcome.load {
        Ok(()) => (StatusCode::OK, "ready", None),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed",
            Some(format!("Failed to load {}: {}", model, e)),
        ),
    };

    let body = PreloadResponse {
        model,
        residency: outcome.class,
        status: label,
        evicted: outcome.evictions.evicted,
        message,
    };
    Ok((status, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub models: Vec<CatalogEntry>,
    pub total: usize,
}

/// GET /api/available_models - Installed models with their residency class
///
/// `?refresh=true` re-reads the backend first; a failed refresh is logged and
/// the stored snapshot is returned.
async fn available_models(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<CatalogQuery>, QueryRejection>,
) -> Result<Json<CatalogResponse>> {
    let query = query_params(query)?;
    if query.refresh {
        if let Err(e) =
            refresh_catalog(state.upstream.as_ref(), state.residency.policy(), &state.store).await
        {
            tracing::warn!(error = %e, "Catalog refresh failed, serving stored snapshot");
        }
    }

    let models = state.store.list_catalog()?;
    Ok(Json(CatalogResponse {
        total: models.len(),
        models,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/keys", post(create_key))
        .route("/admin/stats", get(stats))
        .route("/admin/preload", post(preload))
        .route("/api/available_models", get(available_models))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_master))
        .with_state(state)
}
