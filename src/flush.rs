//! Periodic batch writer from the ingestion buffer into the reading store.
//!
//! Durability is at-most-once: a batch is removed from the buffer before the
//! write is attempted, and a failed write is logged and dropped rather than
//! retried or re-enqueued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, trace};

use crate::buffer::IngestBuffer;
use crate::scheduler::Tick;
use crate::store::ReadingStore;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSettings {
    pub interval: Duration,
    /// Upper bound on readings written per tick.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffer was empty; nothing attempted.
    Idle,
    /// Batch of this many readings written.
    Stored(usize),
    /// Write failed; this many readings are lost.
    Dropped(usize),
}

pub struct BatchFlusher<S: ?Sized> {
    buffer: IngestBuffer,
    store: Arc<S>,
    settings: FlushSettings,
}

impl<S> BatchFlusher<S>
where
    S: ReadingStore + ?Sized,
{
    pub fn new(buffer: IngestBuffer, store: Arc<S>, settings: FlushSettings) -> Self {
        Self {
            buffer,
            store,
            settings,
        }
    }

    /// Drain at most one batch and write it in a single bulk insert.
    pub async fn flush_once(&self) -> FlushOutcome {
        // ---
        if self.buffer.is_empty() {
            trace!("No sensor data to flush");
            return FlushOutcome::Idle;
        }

        let batch = self.buffer.drain(self.settings.batch_size);
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        match self.store.bulk_insert(&batch).await {
            Ok(()) => {
                debug!("Saved batch of {} readings", batch.len());
                FlushOutcome::Stored(batch.len())
            }
            Err(e) => {
                error!("Error saving batch, {} readings dropped: {}", batch.len(), e);
                FlushOutcome::Dropped(batch.len())
            }
        }
    }

    /// Flush batch after batch until the buffer is observed empty.
    ///
    /// Used on shutdown; readings enqueued concurrently may or may not be
    /// included. Returns the number of readings stored.
    pub async fn flush_all(&self) -> usize {
        // ---
        let mut stored = 0;
        loop {
            match self.flush_once().await {
                FlushOutcome::Idle => return stored,
                FlushOutcome::Stored(n) => stored += n,
                FlushOutcome::Dropped(_) => {}
            }
        }
    }
}

#[async_trait]
impl<S> Tick for BatchFlusher<S>
where
    S: ReadingStore + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        "flush"
    }

    async fn tick(&self) {
        self.flush_once().await;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::MemoryStore;
    use crate::{Direction, Reading};
    use tokio_test::block_on;

    fn flusher(
        store: &Arc<MemoryStore>,
        batch_size: usize,
    ) -> (IngestBuffer, BatchFlusher<MemoryStore>) {
        let buffer = IngestBuffer::new();
        let flusher = BatchFlusher::new(
            buffer.clone(),
            store.clone(),
            FlushSettings {
                interval: Duration::from_secs(1),
                batch_size,
            },
        );
        (buffer, flusher)
    }

    fn fill(buffer: &IngestBuffer, count: i64) {
        for ts in 0..count {
            buffer.enqueue(Reading {
                sensor_id: 1,
                timestamp: ts,
                direction: Direction::South,
                temperature: 19.5,
            });
        }
    }

    #[test]
    fn test_empty_buffer_is_idle() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (_, flusher) = flusher(&store, 10);

        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Idle);
    }

    #[test]
    fn test_flush_writes_at_most_one_batch() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (buffer, flusher) = flusher(&store, 10);
        fill(&buffer, 25);

        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Stored(10));
        assert_eq!(store.readings().len(), 10);
        assert_eq!(buffer.len(), 15);

        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Stored(10));
        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Stored(5));
        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Idle);
        assert_eq!(store.readings().len(), 25);
    }

    #[test]
    fn test_failed_write_drops_batch() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (buffer, flusher) = flusher(&store, 10);
        fill(&buffer, 4);

        store.set_fail_writes(true);
        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Dropped(4));
        assert!(buffer.is_empty(), "dropped batch must not be re-enqueued");

        store.set_fail_writes(false);
        assert_eq!(block_on(flusher.flush_once()), FlushOutcome::Idle);
        assert!(store.readings().is_empty());
    }

    #[test]
    fn test_flush_all_empties_buffer() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (buffer, flusher) = flusher(&store, 7);
        fill(&buffer, 30);

        assert_eq!(block_on(flusher.flush_all()), 30);
        assert!(buffer.is_empty());
        assert_eq!(store.readings().len(), 30);
    }
}
