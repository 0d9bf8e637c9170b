use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use sensor_rollup::aggregation::AggregationSettings;
use sensor_rollup::flush::FlushSettings;
use sensor_rollup::pipeline::Pipeline;
use sensor_rollup::routes::{self, AppState};
use sensor_rollup::scheduler::Cadence;
use sensor_rollup::store::{MemoryStore, ReadingStore, TelemetryStore};
use sensor_rollup::{Direction, Reading, HOUR_MILLIS};

#[derive(Debug, Deserialize)]
struct Baseline {
    window_end: i64,
    direction: String,
    average_temperature: f64,
}

#[derive(Debug, Deserialize)]
struct Deviation {
    sensor_id: i64,
    window_end: i64,
    direction: String,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct Report {
    baselines: Vec<Baseline>,
    deviations: Vec<Deviation>,
}

struct TestServer {
    base: String,
    store: Arc<MemoryStore>,
    pipeline: Arc<Pipeline<dyn TelemetryStore>>,
}

/// Serve the real router over an ephemeral port, backed by a memory store.
/// Timers are not started; tests drive flush and aggregation directly.
async fn spawn_server() -> Result<TestServer> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn TelemetryStore> = store.clone();
    let pipeline: Arc<Pipeline<dyn TelemetryStore>> = Arc::new(Pipeline::new(
        dyn_store.clone(),
        FlushSettings {
            interval: Duration::from_secs(1),
            batch_size: 100,
        },
        AggregationSettings {
            deviation_percentage: 0.1,
        },
        Cadence::Every(Duration::from_secs(3600)),
    ));

    let app = routes::router(AppState {
        pipeline: pipeline.clone(),
        store: dyn_store,
        report_lookback: Duration::from_secs(7 * 24 * 3600),
    });

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestServer {
        base: format!("http://{}", addr),
        store,
        pipeline,
    })
}

#[tokio::test]
async fn health_endpoint_ok() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let body: serde_json::Value = Client::new()
        .get(format!("{}/health", server.base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_rejected() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();

    for url in [
        format!("{}/sensors", server.base),
        format!("{}/sensors/data/42", server.base),
    ] {
        let resp = client.get(&url).send().await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "url {}", url);
        assert_eq!(resp.text().await?, "Requested page does not exists");
    }
    Ok(())
}

#[tokio::test]
async fn valid_reading_is_buffered() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let resp = Client::new()
        .post(format!("{}/sensors/data", server.base))
        .json(&json!({
            "id": 1,
            "timestamp": 1_700_000_000_000_i64,
            "face": "NORTH",
            "temperature": 21.5
        }))
        .send()
        .await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await?, "Sensor data received.");

    let buffered = server.pipeline.buffer().drain(10);
    assert_eq!(
        buffered,
        vec![Reading {
            sensor_id: 1,
            timestamp: 1_700_000_000_000,
            direction: Direction::North,
            temperature: 21.5,
        }]
    );
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_rejected() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();
    let url = format!("{}/sensors/data", server.base);

    let cases = [
        (
            json!({"timestamp": 1, "face": "NORTH", "temperature": 1.0}),
            "Sensor id is missing",
        ),
        (
            json!({"id": 1, "face": "NORTH", "temperature": 1.0}),
            "Timestamp is missing",
        ),
        (
            json!({"id": 1, "timestamp": 1, "temperature": 1.0}),
            "Face direction is missing",
        ),
        (
            json!({"id": 1, "timestamp": 1, "face": "NORTH"}),
            "Temperature is missing",
        ),
        (
            json!({"face": "NORTH", "temperature": 1.0}),
            "Sensor id is missing;Timestamp is missing",
        ),
    ];

    for (body, expected) in cases {
        let resp = client.post(&url).json(&body).send().await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(resp.text().await?, expected);
    }

    assert!(server.pipeline.buffer().is_empty());
    Ok(())
}

#[tokio::test]
async fn type_mismatch_is_rejected() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();
    let url = format!("{}/sensors/data", server.base);

    for body in [
        json!({"id": "one", "timestamp": 1, "face": "NORTH", "temperature": 1.0}),
        json!({"id": 1, "timestamp": 1, "face": "UP", "temperature": 1.0}),
    ] {
        let resp = client.post(&url).json(&body).send().await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.text().await?, "JSON contains field with type mismatch");
    }

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await?, "JSON contains field with type mismatch");

    assert!(server.pipeline.buffer().is_empty());
    Ok(())
}

#[tokio::test]
async fn report_shows_rollup_after_aggregation() -> Result<()> {
    // ---
    let server = spawn_server().await?;
    let client = Client::new();

    let now = chrono::Utc::now().timestamp_millis();
    let window_end = now - now.rem_euclid(HOUR_MILLIS);
    let in_window = window_end - 10 * 60 * 1000;

    for (id, temperature) in [(1, 20.0), (2, 22.0), (3, 50.0)] {
        let resp = client
            .post(format!("{}/sensors/data", server.base))
            .json(&json!({
                "id": id,
                "timestamp": in_window,
                "face": "NORTH",
                "temperature": temperature
            }))
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    server.pipeline.flusher().flush_once().await;
    assert_eq!(server.store.readings().len(), 3);
    server.pipeline.engine().run_cycle(now).await?;

    let report: Report = client
        .get(format!("{}/sensors/report", server.base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(report.baselines.len(), 1);
    assert_eq!(report.baselines[0].direction, "NORTH");
    assert_eq!(report.baselines[0].window_end, window_end);
    assert_eq!(report.baselines[0].average_temperature, 30.67);

    assert_eq!(report.deviations.len(), 3);
    assert!(report
        .deviations
        .iter()
        .all(|d| d.window_end == window_end && d.direction == "NORTH"));
    let c = report.deviations.iter().find(|d| d.sensor_id == 3).unwrap();
    assert_eq!(c.temperature, 50.0);

    let remaining = server
        .store
        .query_window_grouped_by_sensor(sensor_rollup::Window::closed_hour_before(now))
        .await?;
    assert!(remaining.is_empty());
    Ok(())
}
