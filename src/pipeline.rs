//! The ingestion-to-rollup pipeline as one explicit component.
//!
//! `Pipeline` owns the ingestion buffer and the store port, accepts readings
//! through [`Pipeline::submit_reading`], and runs the flush and aggregation
//! timers once started.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregation::{AggregationEngine, AggregationSettings};
use crate::buffer::IngestBuffer;
use crate::flush::{BatchFlusher, FlushSettings};
use crate::scheduler::{self, Cadence};
use crate::store::TelemetryStore;
use crate::{Direction, Reading};

// ---

pub struct Pipeline<S: ?Sized> {
    buffer: IngestBuffer,
    flusher: Arc<BatchFlusher<S>>,
    engine: Arc<AggregationEngine<S>>,
    flush_cadence: Cadence,
    aggregation_cadence: Cadence,
}

impl<S> Pipeline<S>
where
    S: TelemetryStore + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        flush: FlushSettings,
        aggregation: AggregationSettings,
        aggregation_cadence: Cadence,
    ) -> Self {
        // ---
        let buffer = IngestBuffer::new();
        Self {
            flusher: Arc::new(BatchFlusher::new(buffer.clone(), store.clone(), flush)),
            engine: Arc::new(AggregationEngine::new(store, aggregation)),
            buffer,
            flush_cadence: Cadence::Every(flush.interval),
            aggregation_cadence,
        }
    }

    /// Hand a validated reading to the ingestion buffer. Always succeeds.
    pub fn submit_reading(
        &self,
        sensor_id: i64,
        timestamp_millis: i64,
        direction: Direction,
        temperature: f64,
    ) {
        // ---
        self.buffer.enqueue(Reading {
            sensor_id,
            timestamp: timestamp_millis,
            direction,
            temperature,
        });
    }

    pub fn buffer(&self) -> &IngestBuffer {
        &self.buffer
    }

    pub fn flusher(&self) -> &BatchFlusher<S> {
        &self.flusher
    }

    pub fn engine(&self) -> &AggregationEngine<S> {
        &self.engine
    }

    /// Spawn the flush and aggregation timers on the current tokio runtime.
    pub fn start(&self) -> RunningPipeline<S> {
        // ---
        let (shutdown_tx, shutdown_rx) = scheduler::shutdown_channel();
        let timers = vec![
            scheduler::spawn_recurring(
                self.flusher.clone(),
                self.flush_cadence.clone(),
                shutdown_rx.clone(),
            ),
            scheduler::spawn_recurring(
                self.engine.clone(),
                self.aggregation_cadence.clone(),
                shutdown_rx,
            ),
        ];

        RunningPipeline {
            shutdown_tx,
            timers,
            flusher: self.flusher.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

/// Handle to the running timers.
pub struct RunningPipeline<S: ?Sized> {
    shutdown_tx: watch::Sender<bool>,
    timers: Vec<JoinHandle<()>>,
    flusher: Arc<BatchFlusher<S>>,
    buffer: IngestBuffer,
}

impl<S> RunningPipeline<S>
where
    S: TelemetryStore + ?Sized + 'static,
{
    /// Stop issuing ticks, wait for in-flight ticks to finish, and optionally
    /// flush whatever is still buffered.
    pub async fn shutdown(self, drain: bool) {
        // ---
        let _ = self.shutdown_tx.send(true);
        for timer in self.timers {
            if let Err(e) = timer.await {
                warn!("Timer task ended abnormally: {}", e);
            }
        }

        if drain {
            let stored = self.flusher.flush_all().await;
            info!("Drained {} buffered readings on shutdown", stored);
        } else if !self.buffer.is_empty() {
            warn!("Discarding {} buffered readings on shutdown", self.buffer.len());
        }
    }
}
