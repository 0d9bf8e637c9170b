//! Temperature telemetry ingestion and hourly rollup.
//!
//! Readings enter through [`pipeline::Pipeline::submit_reading`] into an
//! unbounded [`buffer::IngestBuffer`]. A fixed-rate flush task writes them in
//! batches to the reading store; an hourly aggregation task reduces the last
//! completed hour into per-direction baselines and deviation records, then
//! purges that hour's raw readings.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): shared
//! models are re-exported here so sibling modules only depend on the crate
//! root, never on each other's internals.

pub mod aggregation;
pub mod buffer;
pub mod config;
pub mod flush;
pub mod logging;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod simulator;
pub mod store;

mod models;

pub use config::Config;
pub use models::{
    format_millis, round2, DeviationRecord, Direction, DirectionBaseline, Reading, SensorAverage,
    Window, HOUR_MILLIS,
};
