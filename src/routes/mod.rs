//! HTTP gateway: merges every endpoint subrouter under one shared state.

use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, Router};

use crate::pipeline::Pipeline;
use crate::store::TelemetryStore;

mod health;
mod ingest;
mod report;

pub use ingest::{
    JSON_TYPE_MISMATCH_MESSAGE, MISSING_SENSOR_FACE_DIRECTION_MESSAGE, MISSING_SENSOR_ID_MESSAGE,
    MISSING_SENSOR_TEMPERATURE_MESSAGE, MISSING_SENSOR_TIMESTAMP_MESSAGE,
};

pub const NO_RESOURCE_FOUND_MESSAGE: &str = "Requested page does not exists";

// ---

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline<dyn TelemetryStore>>,
    pub store: Arc<dyn TelemetryStore>,
    /// Baselines older than this are left out of the report.
    pub report_lookback: Duration,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(report::router())
        .merge(health::router())
        .fallback(no_resource_found)
        .with_state(state)
}

async fn no_resource_found() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, NO_RESOURCE_FOUND_MESSAGE)
}
