//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::persistence::LedgerStore;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: String,
    version: &'static str,
    total_conns: u32,
    idle_conns: u32,
    acquired_conns: u32,
    max_conns: u32,
}

/// `GET /health`: Store reachability and pool population.
///
/// Responds 503 when no connection answers a ping within the point budget.
pub async fn health_handler<S: LedgerStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let ping = state.engine.ping().await;
    let stats = state.engine.pool_stats();

    let (code, status, error) = match ping {
        Ok(()) => (StatusCode::OK, "healthy", None),
        Err(err) => {
            tracing::warn!(error = %err, ?stats, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", Some(err.to_string()))
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            error,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            total_conns: stats.total,
            idle_conns: stats.idle,
            acquired_conns: stats.acquired,
            max_conns: stats.max,
        }),
    )
}

/// System routes mounted at the root level (not under /api).
pub fn routes<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new().route("/health", get(health_handler::<S>))
}
