//! Unbounded in-memory FIFO between request handlers and the flush task.
//!
//! Any number of producers may `enqueue` concurrently; a single consumer
//! (the flush task) calls `drain`. Neither side ever blocks waiting for the
//! other, and there is no capacity limit.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::Reading;

// ---

/// Cloneable handle to the shared ingestion queue.
///
/// Every clone refers to the same queue. Items enqueued by one producer are
/// drained in the order that producer enqueued them; there is no ordering
/// between different producers.
#[derive(Clone)]
pub struct IngestBuffer {
    tx: Sender<Reading>,
    rx: Receiver<Reading>,
}

impl IngestBuffer {
    pub fn new() -> Self {
        // ---
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a reading to the tail of the queue. Always succeeds.
    pub fn enqueue(&self, reading: Reading) {
        // ---
        // `rx` lives as long as `self`, so the channel can never be disconnected.
        let _ = self.tx.send(reading);
    }

    /// Pop up to `max` readings from the head of the queue, leaving the rest.
    pub fn drain(&self, max: usize) -> Vec<Reading> {
        self.rx.try_iter().take(max).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for IngestBuffer {
    fn default() -> Self {
        Self::new()
    }
}
