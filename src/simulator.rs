//! Synthetic sensor fleet that feeds the ingestion endpoint.
//!
//! Each sensor gets a random direction once, at fleet creation. Every round
//! produces one reading per sensor stamped with the same wall-clock time;
//! every `deviation_interval`-th sensor reads from the deviation range so the
//! rollup has outliers to flag.

use std::time::Instant;

use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::SimulatorConfig;
use crate::Direction;

// ---

/// Wire form of a reading as accepted by `POST /sensors/data`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutgoingReading {
    pub id: i64,
    pub timestamp: i64,
    pub face: Direction,
    pub temperature: f64,
}

pub struct SensorFleet {
    /// `directions[i]` belongs to sensor `i + 1`.
    directions: Vec<Direction>,
    config: SimulatorConfig,
}

impl SensorFleet {
    pub fn new<R: Rng>(config: SimulatorConfig, rng: &mut R) -> Self {
        // ---
        let directions: Vec<Direction> = (0..config.sensor_count)
            .map(|_| Direction::ALL[rng.gen_range(0..Direction::ALL.len())])
            .collect();
        debug!("Created direction map for {} sensors", directions.len());
        Self { directions, config }
    }

    pub fn direction_of(&self, sensor_id: i64) -> Option<Direction> {
        let index = usize::try_from(sensor_id.checked_sub(1)?).ok()?;
        self.directions.get(index).copied()
    }

    /// One reading per sensor, all stamped `now_millis`.
    pub fn generate<R: Rng>(&self, now_millis: i64, rng: &mut R) -> Vec<OutgoingReading> {
        // ---
        self.directions
            .iter()
            .zip(1_i64..)
            .map(|(&face, id)| OutgoingReading {
                id,
                timestamp: now_millis,
                face,
                temperature: self.temperature_for(id, rng),
            })
            .collect()
    }

    fn temperature_for<R: Rng>(&self, sensor_id: i64, rng: &mut R) -> f64 {
        // ---
        let cfg = &self.config;
        if sensor_id % i64::from(cfg.deviation_interval) == 0 {
            rng.gen_range(cfg.min_deviation_temperature..cfg.max_deviation_temperature)
        } else {
            rng.gen_range(cfg.min_temperature..cfg.max_temperature)
        }
    }

    /// Generate a round and POST every reading independently without waiting
    /// for the responses.
    pub fn send_round<R: Rng>(&self, client: &Client, now_millis: i64, rng: &mut R) {
        // ---
        let started = Instant::now();
        let readings = self.generate(now_millis, rng);
        let generation = started.elapsed();

        for reading in readings {
            let client = client.clone();
            let url = self.config.endpoint_url.clone();
            tokio::spawn(async move {
                let result = client
                    .post(&url)
                    .json(&reading)
                    .send()
                    .await
                    .and_then(|resp| resp.error_for_status());
                if let Err(e) = result {
                    error!("Failed to send sensor data with id {}: {}", reading.id, e);
                }
            });
        }

        info!(
            "Data generation took {:?}, dispatching took {:?}",
            generation,
            started.elapsed() - generation
        );
    }
}
