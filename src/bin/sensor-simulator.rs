//! Synthetic sensor fleet for exercising the `sensor-rollup` service.
//!
//! Sends one reading per simulated sensor every `SENDING_RATE_MS` to
//! `SENSOR_ENDPOINT_URL` until interrupted. See `config::load_simulator_from_env`
//! for the recognized variables.
use anyhow::Result;
use chrono::Utc;
use dotenvy::dotenv;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{self, MissedTickBehavior};

use sensor_rollup::config;
use sensor_rollup::logging::init_tracing;
use sensor_rollup::simulator::SensorFleet;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_simulator_from_env()?;
    tracing::info!(
        "Simulating {} sensors every {:?} against {}",
        cfg.sensor_count,
        cfg.sending_rate,
        cfg.endpoint_url
    );

    let client = reqwest::Client::new();
    let mut rng = StdRng::from_entropy();
    let mut interval = time::interval(cfg.sending_rate);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let fleet = SensorFleet::new(cfg, &mut rng);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                fleet.send_round(&client, Utc::now().timestamp_millis(), &mut rng);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping simulator");
                break;
            }
        }
    }

    Ok(())
}
