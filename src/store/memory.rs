use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ReadingStore, RollupStore, StoreError, TelemetryStore};
use crate::{round2, DeviationRecord, Direction, DirectionBaseline, Reading, SensorAverage, Window};

// ---

#[derive(Default)]
struct Tables {
    readings: BTreeMap<(i64, i64), Reading>,
    baselines: BTreeMap<(i64, Direction), DirectionBaseline>,
    deviations: BTreeMap<(i64, i64), DeviationRecord>,
}

/// Process-local store used when no database is configured, and as the test
/// double for the storage ports.
///
/// All tables sit behind one lock, so `commit_window` is atomic. Writes that
/// hit an existing key are ignored, matching the PostgreSQL store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write operation fails with [`StoreError::Unavailable`]
    /// without touching the tables.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the raw readings ordered by `(sensor_id, timestamp)`.
    pub fn readings(&self) -> Vec<Reading> {
        self.tables.lock().readings.values().copied().collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        // ---
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".into()));
        }
        Ok(())
    }
}

impl Tables {
    fn purge(&mut self, window: Window) -> u64 {
        // ---
        let before = self.readings.len();
        self.readings.retain(|_, r| !window.contains(r.timestamp));
        (before - self.readings.len()) as u64
    }

    fn insert_baselines(&mut self, baselines: &[DirectionBaseline]) {
        for b in baselines {
            self.baselines.entry((b.window_end, b.direction)).or_insert(*b);
        }
    }

    fn insert_deviations(&mut self, deviations: &[DeviationRecord]) {
        for d in deviations {
            self.deviations.entry((d.window_end, d.sensor_id)).or_insert(*d);
        }
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn bulk_insert(&self, readings: &[Reading]) -> Result<(), StoreError> {
        // ---
        self.check_writable()?;
        let mut tables = self.tables.lock();
        for r in readings {
            tables.readings.entry((r.sensor_id, r.timestamp)).or_insert(*r);
        }
        Ok(())
    }

    async fn query_window_grouped_by_sensor(
        &self,
        window: Window,
    ) -> Result<Vec<SensorAverage>, StoreError> {
        // ---
        let tables = self.tables.lock();

        // (sum, count, last_seen)
        let mut groups: BTreeMap<(i64, Direction), (f64, u32, i64)> = BTreeMap::new();
        for r in tables.readings.values().filter(|r| window.contains(r.timestamp)) {
            let entry = groups
                .entry((r.sensor_id, r.direction))
                .or_insert((0.0, 0, i64::MIN));
            entry.0 += r.temperature;
            entry.1 += 1;
            entry.2 = entry.2.max(r.timestamp);
        }

        Ok(groups
            .into_iter()
            .map(|((sensor_id, direction), (sum, count, last_seen))| SensorAverage {
                sensor_id,
                direction,
                last_seen,
                temperature: round2(sum / f64::from(count)),
            })
            .collect())
    }

    async fn delete_range(&self, window: Window) -> Result<u64, StoreError> {
        self.check_writable()?;
        Ok(self.tables.lock().purge(window))
    }
}

#[async_trait]
impl RollupStore for MemoryStore {
    async fn save_baselines(&self, baselines: &[DirectionBaseline]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables.lock().insert_baselines(baselines);
        Ok(())
    }

    async fn save_deviations(&self, deviations: &[DeviationRecord]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables.lock().insert_deviations(deviations);
        Ok(())
    }

    async fn find_baselines_since(&self, since: i64) -> Result<Vec<DirectionBaseline>, StoreError> {
        // ---
        Ok(self
            .tables
            .lock()
            .baselines
            .range((since, Direction::South)..)
            .map(|(_, b)| *b)
            .collect())
    }

    async fn find_all_deviations(&self) -> Result<Vec<DeviationRecord>, StoreError> {
        Ok(self.tables.lock().deviations.values().copied().collect())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn commit_window(
        &self,
        window: Window,
        baselines: &[DirectionBaseline],
        deviations: &[DeviationRecord],
    ) -> Result<u64, StoreError> {
        // ---
        self.check_writable()?;
        let mut tables = self.tables.lock();
        tables.insert_baselines(baselines);
        tables.insert_deviations(deviations);
        Ok(tables.purge(window))
    }
}
