//! Storage ports for raw readings and hourly rollups.
//!
//! The flush task only needs [`ReadingStore`]; the aggregation engine needs
//! the full [`TelemetryStore`], whose `commit_window` persists a window's
//! rollup and purges its raw readings as one unit.

use async_trait::async_trait;
use thiserror::Error;

use crate::{DeviationRecord, DirectionBaseline, Reading, SensorAverage, Window};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable table of raw readings keyed by `(sensor_id, timestamp)`.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert every reading or none of them.
    async fn bulk_insert(&self, readings: &[Reading]) -> Result<(), StoreError>;

    /// One row per `(sensor_id, direction)` with readings inside `window`.
    async fn query_window_grouped_by_sensor(
        &self,
        window: Window,
    ) -> Result<Vec<SensorAverage>, StoreError>;

    /// Delete every reading inside `window`, returning how many were removed.
    async fn delete_range(&self, window: Window) -> Result<u64, StoreError>;
}

/// Append-only tables of direction baselines and deviation records.
#[async_trait]
pub trait RollupStore: Send + Sync {
    async fn save_baselines(&self, baselines: &[DirectionBaseline]) -> Result<(), StoreError>;

    async fn save_deviations(&self, deviations: &[DeviationRecord]) -> Result<(), StoreError>;

    /// Baselines whose window ends at or after `since` (epoch millis).
    async fn find_baselines_since(&self, since: i64) -> Result<Vec<DirectionBaseline>, StoreError>;

    async fn find_all_deviations(&self) -> Result<Vec<DeviationRecord>, StoreError>;
}

#[async_trait]
pub trait TelemetryStore: ReadingStore + RollupStore {
    /// Save the rollup for `window` and purge its raw readings atomically.
    ///
    /// On error nothing is written and nothing is purged. Returns the number
    /// of purged readings.
    async fn commit_window(
        &self,
        window: Window,
        baselines: &[DirectionBaseline],
        deviations: &[DeviationRecord],
    ) -> Result<u64, StoreError>;
}
