//! Database schema management for `sensor-rollup`.
//!
//! Ensures the raw reading and rollup tables exist before the pipeline starts.
//! Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the database schema (idempotent).
///
/// Creates `sensor_reading` for buffered raw readings awaiting aggregation,
/// plus the append-only rollup tables `direction_baseline` and
/// `sensor_deviation`. Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw readings, purged window by window after aggregation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_reading (
            sensor_id   BIGINT           NOT NULL,
            recorded_at BIGINT           NOT NULL,
            direction   TEXT             NOT NULL,
            temperature DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (sensor_id, recorded_at)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Window range scans and purges
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_reading_recorded_at
            ON sensor_reading (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS direction_baseline (
            direction           TEXT             NOT NULL,
            window_end          BIGINT           NOT NULL,
            average_temperature DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (direction, window_end)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_direction_baseline_window_end
            ON direction_baseline (window_end);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_deviation (
            sensor_id   BIGINT           NOT NULL,
            window_end  BIGINT           NOT NULL,
            direction   TEXT             NOT NULL,
            temperature DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (sensor_id, window_end)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
