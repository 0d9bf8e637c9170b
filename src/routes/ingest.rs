use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::{trace, warn};

use super::AppState;
use crate::Direction;

pub const MISSING_SENSOR_ID_MESSAGE: &str = "Sensor id is missing";
pub const MISSING_SENSOR_TIMESTAMP_MESSAGE: &str = "Timestamp is missing";
pub const MISSING_SENSOR_FACE_DIRECTION_MESSAGE: &str = "Face direction is missing";
pub const MISSING_SENSOR_TEMPERATURE_MESSAGE: &str = "Temperature is missing";
pub const JSON_TYPE_MISMATCH_MESSAGE: &str = "JSON contains field with type mismatch";

const RECEIVED_MESSAGE: &str = "Sensor data received.";

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/sensors/data", post(handler))
}

/// Incoming reading; every field is required but checked after parsing so
/// that all missing fields can be reported together.
#[derive(Debug, Deserialize)]
struct SensorDataPayload {
    id: Option<i64>,
    timestamp: Option<i64>,
    face: Option<Direction>,
    temperature: Option<f64>,
}

#[derive(Debug)]
enum IngestError {
    MissingFields(Vec<&'static str>),
    TypeMismatch,
    Rejected(JsonRejection),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // ---
        let message = match self {
            IngestError::MissingFields(messages) => messages.join(";"),
            IngestError::TypeMismatch => JSON_TYPE_MISMATCH_MESSAGE.to_string(),
            IngestError::Rejected(rejection) => {
                warn!("Rejected sensor data request: {}", rejection.body_text());
                return rejection.into_response();
            }
        };
        warn!("Rejected sensor data: {}", message);
        (StatusCode::BAD_REQUEST, message).into_response()
    }
}

async fn handler(
    State(state): State<AppState>,
    payload: Result<Json<SensorDataPayload>, JsonRejection>,
) -> Result<&'static str, IngestError> {
    // ---
    let Json(payload) = payload.map_err(|rejection| match rejection {
        JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
            IngestError::TypeMismatch
        }
        other => IngestError::Rejected(other),
    })?;

    let (sensor_id, timestamp, direction, temperature) = validate(payload)?;
    trace!(
        "Received reading: sensor {} at {} facing {}: {}",
        sensor_id,
        timestamp,
        direction,
        temperature
    );
    state
        .pipeline
        .submit_reading(sensor_id, timestamp, direction, temperature);

    Ok(RECEIVED_MESSAGE)
}

fn validate(payload: SensorDataPayload) -> Result<(i64, i64, Direction, f64), IngestError> {
    // ---
    match payload {
        SensorDataPayload {
            id: Some(id),
            timestamp: Some(timestamp),
            face: Some(face),
            temperature: Some(temperature),
        } => Ok((id, timestamp, face, temperature)),
        partial => {
            let mut missing = Vec::new();
            if partial.id.is_none() {
                missing.push(MISSING_SENSOR_ID_MESSAGE);
            }
            if partial.timestamp.is_none() {
                missing.push(MISSING_SENSOR_TIMESTAMP_MESSAGE);
            }
            if partial.face.is_none() {
                missing.push(MISSING_SENSOR_FACE_DIRECTION_MESSAGE);
            }
            if partial.temperature.is_none() {
                missing.push(MISSING_SENSOR_TEMPERATURE_MESSAGE);
            }
            Err(IngestError::MissingFields(missing))
        }
    }
}
