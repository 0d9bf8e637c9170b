//! Hourly rollup of raw readings into direction baselines and deviation records.
//!
//! One cycle covers the most recently completed hour `[H-1h, H)`:
//! 1. Read one average per sensor from the reading store.
//! 2. Average those per direction into a baseline (2 decimal places).
//! 3. Flag sensors whose average differs from their baseline by more than
//!    `baseline * deviation_percentage`.
//! 4. Save baselines and deviations stamped at `H` and purge the window's raw
//!    readings in one atomic store call.
//!
//! An empty window ends the cycle early, which makes re-running an already
//! purged window a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::scheduler::Tick;
use crate::store::{StoreError, TelemetryStore};
use crate::{
    format_millis, round2, DeviationRecord, Direction, DirectionBaseline, SensorAverage, Window,
};

// ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationSettings {
    /// Fraction of the baseline a sensor may deviate by before it is flagged.
    pub deviation_percentage: f64,
}

/// Result of a cycle that found data.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub window: Window,
    pub sensors: usize,
    pub baselines: Vec<DirectionBaseline>,
    pub deviations: Vec<DeviationRecord>,
    pub purged: u64,
}

pub struct AggregationEngine<S: ?Sized> {
    store: Arc<S>,
    settings: AggregationSettings,
}

impl<S> AggregationEngine<S>
where
    S: TelemetryStore + ?Sized,
{
    pub fn new(store: Arc<S>, settings: AggregationSettings) -> Self {
        Self { store, settings }
    }

    /// Aggregate the hour that closed at or before `now_millis`.
    ///
    /// Returns `Ok(None)` when the window holds no readings.
    pub async fn run_cycle(&self, now_millis: i64) -> Result<Option<CycleReport>, StoreError> {
        // ---
        let window = Window::closed_hour_before(now_millis);
        info!(
            "Extracting data for window {} at {}",
            window,
            format_millis(now_millis)
        );

        let averages = self.store.query_window_grouped_by_sensor(window).await?;
        if averages.is_empty() {
            warn!("No sensor data found for window {}", window);
            return Ok(None);
        }
        debug!("Extracted {} per-sensor averages", averages.len());

        let by_direction = direction_averages(&averages);
        let deviations = flag_deviations(
            &averages,
            &by_direction,
            self.settings.deviation_percentage,
            window.end,
        );
        for d in &deviations {
            warn!(
                "Deviation detected for sensor ID {} ({}) at {}: {:.2}",
                d.sensor_id,
                d.direction,
                format_millis(d.window_end),
                d.temperature
            );
        }

        let baselines: Vec<DirectionBaseline> = by_direction
            .into_iter()
            .map(|(direction, average_temperature)| DirectionBaseline {
                window_end: window.end,
                direction,
                average_temperature,
            })
            .collect();

        let purged = self
            .store
            .commit_window(window, &baselines, &deviations)
            .await?;
        debug!("Removed {} raw readings for window {}", purged, window);

        Ok(Some(CycleReport {
            window,
            sensors: averages.len(),
            baselines,
            deviations,
            purged,
        }))
    }
}

#[async_trait]
impl<S> Tick for AggregationEngine<S>
where
    S: TelemetryStore + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        "aggregation"
    }

    async fn tick(&self) {
        // ---
        match self.run_cycle(Utc::now().timestamp_millis()).await {
            Ok(Some(report)) => info!(
                "Window {} aggregated: {} sensors, {} baselines, {} deviations, {} readings purged",
                report.window,
                report.sensors,
                report.baselines.len(),
                report.deviations.len(),
                report.purged
            ),
            Ok(None) => {}
            Err(e) => error!("Error handling sensors data, cycle aborted: {}", e),
        }
    }
}

/// Mean of the per-sensor averages for every direction present, rounded to
/// two decimal places.
pub fn direction_averages(averages: &[SensorAverage]) -> BTreeMap<Direction, f64> {
    // ---
    let mut sums: BTreeMap<Direction, (f64, u32)> = BTreeMap::new();
    for a in averages {
        let entry = sums.entry(a.direction).or_insert((0.0, 0));
        entry.0 += a.temperature;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(direction, (sum, count))| (direction, round2(sum / f64::from(count))))
        .collect()
}

/// Sensors whose average lies outside `baseline ± baseline * deviation_percentage`.
///
/// A direction without a baseline is compared against `0.0`, which flags
/// every sensor with a nonzero average.
pub fn flag_deviations(
    averages: &[SensorAverage],
    baselines: &BTreeMap<Direction, f64>,
    deviation_percentage: f64,
    window_end: i64,
) -> Vec<DeviationRecord> {
    // ---
    averages
        .iter()
        .filter(|sensor| {
            let baseline = baselines.get(&sensor.direction).copied().unwrap_or(0.0);
            let max_deviation = baseline * deviation_percentage;
            (sensor.temperature - baseline).abs() > max_deviation
        })
        .map(|sensor| DeviationRecord {
            sensor_id: sensor.sensor_id,
            window_end,
            direction: sensor.direction,
            temperature: sensor.temperature,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::{MemoryStore, ReadingStore, RollupStore};
    use crate::{Reading, HOUR_MILLIS};
    use tokio_test::block_on;

    /// 2025-03-26T18:00:00Z
    const H: i64 = 1_743_012_000_000;

    fn avg(sensor_id: i64, direction: Direction, temperature: f64) -> SensorAverage {
        SensorAverage {
            sensor_id,
            direction,
            last_seen: H - 1,
            temperature,
        }
    }

    fn reading(sensor_id: i64, timestamp: i64, direction: Direction, temperature: f64) -> Reading {
        Reading {
            sensor_id,
            timestamp,
            direction,
            temperature,
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> AggregationEngine<MemoryStore> {
        AggregationEngine::new(
            store.clone(),
            AggregationSettings {
                deviation_percentage: 0.1,
            },
        )
    }

    #[test]
    fn test_single_outlier_flags_whole_group() {
        // ---
        let averages = [
            avg(1, Direction::North, 20.0),
            avg(2, Direction::North, 22.0),
            avg(3, Direction::North, 50.0),
        ];

        let baselines = direction_averages(&averages);
        assert_eq!(baselines[&Direction::North], 30.67);

        let flagged = flag_deviations(&averages, &baselines, 0.1, H);
        let ids: Vec<i64> = flagged.iter().map(|d| d.sensor_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(flagged.iter().all(|d| d.window_end == H));
        assert_eq!(flagged[2].temperature, 50.0);
    }

    #[test]
    fn test_sensors_inside_band_are_not_flagged() {
        // ---
        let averages = [
            avg(1, Direction::South, 20.0),
            avg(2, Direction::South, 21.0),
            avg(3, Direction::South, 22.0),
            avg(4, Direction::East, 10.0),
        ];

        let baselines = direction_averages(&averages);
        assert_eq!(baselines[&Direction::South], 21.0);
        assert_eq!(baselines[&Direction::East], 10.0);
        assert_eq!(baselines.len(), 2);

        assert!(flag_deviations(&averages, &baselines, 0.1, H).is_empty());
    }

    #[test]
    fn test_deviation_must_strictly_exceed_band() {
        // ---
        let baselines = BTreeMap::from([(Direction::West, 20.0)]);
        let on_edge = [avg(1, Direction::West, 22.0)];
        let past_edge = [avg(1, Direction::West, 22.01)];

        assert!(flag_deviations(&on_edge, &baselines, 0.1, H).is_empty());
        assert_eq!(flag_deviations(&past_edge, &baselines, 0.1, H).len(), 1);
    }

    #[test]
    fn test_missing_baseline_is_treated_as_zero() {
        // ---
        // No EAST baseline: the band collapses to 0 so any nonzero average is flagged.
        let baselines = BTreeMap::from([(Direction::North, 20.0)]);
        let averages = [
            avg(1, Direction::East, 20.0),
            avg(2, Direction::East, 0.0),
            avg(3, Direction::North, 20.0),
        ];

        let flagged = flag_deviations(&averages, &baselines, 0.1, H);
        let ids: Vec<i64> = flagged.iter().map(|d| d.sensor_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_cycle_writes_rollup_and_purges_window() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let start = H - HOUR_MILLIS;
        block_on(store.bulk_insert(&[
            reading(1, start, Direction::North, 20.0),
            reading(1, start + 60_000, Direction::North, 20.0),
            reading(2, start + 120_000, Direction::North, 22.0),
            reading(3, H - 1, Direction::North, 50.0),
            reading(4, start + 5_000, Direction::South, 18.0),
            // Belongs to the next window.
            reading(5, H, Direction::North, 1_000.0),
            // Already outside, in the hour before.
            reading(6, start - 1, Direction::North, 1_000.0),
        ]))
        .unwrap();

        let report = block_on(engine(&store).run_cycle(H + 15 * 60_000))
            .unwrap()
            .expect("window has data");

        assert_eq!(report.window, Window { start, end: H });
        assert_eq!(report.sensors, 4);
        assert_eq!(report.purged, 5);

        let baselines = block_on(store.find_baselines_since(0)).unwrap();
        assert_eq!(baselines.len(), 2);
        let north = baselines
            .iter()
            .find(|b| b.direction == Direction::North)
            .unwrap();
        assert_eq!(north.average_temperature, 30.67);
        assert_eq!(north.window_end, H);

        let deviations = block_on(store.find_all_deviations()).unwrap();
        let ids: Vec<i64> = deviations.iter().map(|d| d.sensor_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let remaining: Vec<i64> = store.readings().iter().map(|r| r.sensor_id).collect();
        assert_eq!(remaining, vec![5, 6]);
    }

    #[test]
    fn test_second_cycle_on_same_window_is_noop() {
        // ---
        let store = Arc::new(MemoryStore::new());
        block_on(store.bulk_insert(&[reading(1, H - 10, Direction::East, 20.0)])).unwrap();
        let engine = engine(&store);

        assert!(block_on(engine.run_cycle(H)).unwrap().is_some());
        assert!(block_on(engine.run_cycle(H)).unwrap().is_none());

        assert_eq!(block_on(store.find_baselines_since(0)).unwrap().len(), 1);
        assert!(block_on(store.find_all_deviations()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_raw_readings_for_retry() {
        // ---
        let store = Arc::new(MemoryStore::new());
        block_on(store.bulk_insert(&[
            reading(1, H - 10, Direction::East, 20.0),
            reading(2, H - 20, Direction::East, 40.0),
        ]))
        .unwrap();
        let engine = engine(&store);

        store.set_fail_writes(true);
        assert!(block_on(engine.run_cycle(H)).is_err());
        assert_eq!(store.readings().len(), 2);
        assert!(block_on(store.find_baselines_since(0)).unwrap().is_empty());

        store.set_fail_writes(false);
        let report = block_on(engine.run_cycle(H)).unwrap().unwrap();
        assert_eq!(report.deviations.len(), 2);
        assert!(store.readings().is_empty());
    }
}
