//! HTTP surface: notification ingest, read APIs and /metrics.
//!
//! Thin adapters only; parsing and serialization live here, every decision
//! about state lives in the engine and analytics modules.

mod ingest;
mod read;
pub mod types;

use crate::config::Config;
use crate::db::DbError;
use crate::engine::Engine;
use crate::error::IngestError;
use axum::Json;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;

/// Shared state for all handlers.
pub struct AppState {
    pub engine: Engine,
    pub config: Config,
}

/// Errors surfaced to API callers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    PayloadTooLarge,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Unauthorized => "invalid signature".to_string(),
            Self::NotFound(msg) => msg.clone(),
            Self::PayloadTooLarge => "payload too large".to_string(),
            // Store details stay in the logs.
            Self::Internal(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed");
        }
        let body = Json(json!({ "error": self.message() }));
        (self.status(), body).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match &e {
            IngestError::Validation(msg) => Self::BadRequest(msg.clone()),
            IngestError::InvalidAppId(app_id) => {
                Self::BadRequest(format!("invalid app id: {app_id}"))
            }
            IngestError::Store(_) | IngestError::DeadlineExceeded(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Handler for GET /healthz.
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "server": state.config.server.name,
    }))
}

/// Build the full router.
pub fn router(state: Arc<AppState>) -> Router {
    let max_body = state.config.http.max_body_bytes;
    Router::new()
        .route("/apps/:app_id/notifications", post(ingest::receive_notification))
        .route("/api/apps/:app_id/channels", get(read::list_epochs))
        .route("/api/apps/:app_id/channels/:channel_name", get(read::channel_detail))
        .route(
            "/api/apps/:app_id/channels/:channel_name/quality",
            get(read::channel_quality),
        )
        .route(
            "/api/apps/:app_id/channels/:channel_name/users",
            get(read::channel_users),
        )
        .route("/api/apps/:app_id/users/:uid", get(read::user_detail))
        .route("/api/apps/:app_id/minutes", post(read::minutes_analytics))
        .route("/api/apps/:app_id/platforms", get(read::observed_platforms))
        .route("/api/apps/:app_id/client-types", get(read::observed_client_types))
        .route("/api/mappings/platforms", get(read::platform_mappings))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.http.bind;
    let app = router(state);

    tracing::info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// App ids are provider-issued tokens: 1-64 chars of `[A-Za-z0-9_-]`.
pub(crate) fn validate_app_id(app_id: &str) -> bool {
    !app_id.is_empty()
        && app_id.len() <= 64
        && app_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
