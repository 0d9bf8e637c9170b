use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error};

use super::AppState;
use crate::{DeviationRecord, DirectionBaseline};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/sensors/report", get(handler))
}

/// Recent direction baselines and every recorded deviation.
#[derive(Debug, Serialize)]
struct ReportResponse {
    baselines: Vec<DirectionBaseline>,
    deviations: Vec<DeviationRecord>,
}

async fn handler(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let lookback_millis = i64::try_from(state.report_lookback.as_millis()).unwrap_or(i64::MAX);
    let since = Utc::now().timestamp_millis().saturating_sub(lookback_millis);

    let result = tokio::try_join!(
        state.store.find_baselines_since(since),
        state.store.find_all_deviations()
    );

    match result {
        Ok((baselines, deviations)) => {
            debug!(
                "GET /sensors/report - {} baselines, {} deviations",
                baselines.len(),
                deviations.len()
            );
            (
                StatusCode::OK,
                Json(ReportResponse {
                    baselines,
                    deviations,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to load report: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load report"),
            )
                .into_response()
        }
    }
}
