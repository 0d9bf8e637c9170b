use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{ReadingStore, RollupStore, StoreError, TelemetryStore};
use crate::{DeviationRecord, Direction, DirectionBaseline, Reading, SensorAverage, Window};

/// Rows per multi-row INSERT; keeps bind parameters well under PostgreSQL's 65535 limit.
const INSERT_CHUNK_ROWS: usize = 10_000;

// ---

/// PostgreSQL implementation of the storage ports.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SensorAverageRow {
    sensor_id: i64,
    direction: String,
    last_seen: i64,
    temperature: f64,
}

#[derive(sqlx::FromRow)]
struct BaselineRow {
    window_end: i64,
    direction: String,
    average_temperature: f64,
}

#[derive(sqlx::FromRow)]
struct DeviationRow {
    sensor_id: i64,
    window_end: i64,
    direction: String,
    temperature: f64,
}

fn parse_direction(raw: &str) -> Result<Direction, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

impl TryFrom<SensorAverageRow> for SensorAverage {
    type Error = StoreError;

    fn try_from(row: SensorAverageRow) -> Result<Self, Self::Error> {
        Ok(SensorAverage {
            sensor_id: row.sensor_id,
            direction: parse_direction(&row.direction)?,
            last_seen: row.last_seen,
            temperature: row.temperature,
        })
    }
}

impl TryFrom<BaselineRow> for DirectionBaseline {
    type Error = StoreError;

    fn try_from(row: BaselineRow) -> Result<Self, Self::Error> {
        Ok(DirectionBaseline {
            window_end: row.window_end,
            direction: parse_direction(&row.direction)?,
            average_temperature: row.average_temperature,
        })
    }
}

impl TryFrom<DeviationRow> for DeviationRecord {
    type Error = StoreError;

    fn try_from(row: DeviationRow) -> Result<Self, Self::Error> {
        Ok(DeviationRecord {
            sensor_id: row.sensor_id,
            window_end: row.window_end,
            direction: parse_direction(&row.direction)?,
            temperature: row.temperature,
        })
    }
}

// ---

async fn insert_readings(conn: &mut PgConnection, readings: &[Reading]) -> Result<(), StoreError> {
    // ---
    for chunk in readings.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO sensor_reading (sensor_id, recorded_at, direction, temperature) ",
        );
        qb.push_values(chunk, |mut row, r| {
            row.push_bind(r.sensor_id)
                .push_bind(r.timestamp)
                .push_bind(r.direction.as_str())
                .push_bind(r.temperature);
        });
        qb.push(" ON CONFLICT (sensor_id, recorded_at) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_baselines(
    conn: &mut PgConnection,
    baselines: &[DirectionBaseline],
) -> Result<(), StoreError> {
    // ---
    if baselines.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO direction_baseline (direction, window_end, average_temperature) ",
    );
    qb.push_values(baselines, |mut row, b| {
        row.push_bind(b.direction.as_str())
            .push_bind(b.window_end)
            .push_bind(b.average_temperature);
    });
    qb.push(" ON CONFLICT (direction, window_end) DO NOTHING");
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_deviations(
    conn: &mut PgConnection,
    deviations: &[DeviationRecord],
) -> Result<(), StoreError> {
    // ---
    for chunk in deviations.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO sensor_deviation (sensor_id, window_end, direction, temperature) ",
        );
        qb.push_values(chunk, |mut row, d| {
            row.push_bind(d.sensor_id)
                .push_bind(d.window_end)
                .push_bind(d.direction.as_str())
                .push_bind(d.temperature);
        });
        qb.push(" ON CONFLICT (sensor_id, window_end) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn purge_window(conn: &mut PgConnection, window: Window) -> Result<u64, StoreError> {
    // ---
    let result = sqlx::query(
        r#"
        DELETE FROM sensor_reading
        WHERE recorded_at >= $1 AND recorded_at < $2
        "#,
    )
    .bind(window.start)
    .bind(window.end)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// ---

#[async_trait]
impl ReadingStore for PgStore {
    async fn bulk_insert(&self, readings: &[Reading]) -> Result<(), StoreError> {
        // ---
        if readings.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        insert_readings(&mut tx, readings).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query_window_grouped_by_sensor(
        &self,
        window: Window,
    ) -> Result<Vec<SensorAverage>, StoreError> {
        // ---
        let rows: Vec<SensorAverageRow> = sqlx::query_as(
            r#"
            SELECT
                sensor_id,
                direction,
                MAX(recorded_at) AS last_seen,
                ROUND(AVG(temperature)::numeric, 2)::float8 AS temperature
            FROM sensor_reading
            WHERE recorded_at >= $1 AND recorded_at < $2
            GROUP BY sensor_id, direction
            ORDER BY sensor_id
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SensorAverage::try_from).collect()
    }

    async fn delete_range(&self, window: Window) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        purge_window(&mut conn, window).await
    }
}

#[async_trait]
impl RollupStore for PgStore {
    async fn save_baselines(&self, baselines: &[DirectionBaseline]) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_baselines(&mut conn, baselines).await
    }

    async fn save_deviations(&self, deviations: &[DeviationRecord]) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_deviations(&mut conn, deviations).await
    }

    async fn find_baselines_since(&self, since: i64) -> Result<Vec<DirectionBaseline>, StoreError> {
        // ---
        let rows: Vec<BaselineRow> = sqlx::query_as(
            r#"
            SELECT window_end, direction, average_temperature
            FROM direction_baseline
            WHERE window_end >= $1
            ORDER BY window_end, direction
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DirectionBaseline::try_from).collect()
    }

    async fn find_all_deviations(&self) -> Result<Vec<DeviationRecord>, StoreError> {
        // ---
        let rows: Vec<DeviationRow> = sqlx::query_as(
            r#"
            SELECT sensor_id, window_end, direction, temperature
            FROM sensor_deviation
            ORDER BY window_end, sensor_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeviationRecord::try_from).collect()
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn commit_window(
        &self,
        window: Window,
        baselines: &[DirectionBaseline],
        deviations: &[DeviationRecord],
    ) -> Result<u64, StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;
        insert_baselines(&mut tx, baselines).await?;
        insert_deviations(&mut tx, deviations).await?;
        let purged = purge_window(&mut tx, window).await?;
        tx.commit().await?;
        Ok(purged)
    }
}
