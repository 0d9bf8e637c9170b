// src/routes/health.rs
//! Liveness endpoint for the rollup service.
//!
//! Used by container orchestrators and the simulator's operators to check
//! that the process is up. It does not touch the store, so it stays green
//! while the database is unreachable; storage failures show up in the logs of
//! the flush and aggregation ticks instead.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter containing the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
