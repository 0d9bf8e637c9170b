//! Recurring timers that drive the flush and aggregation ticks.
//!
//! A timer is a tokio task that calls [`Tick::tick`] on a [`Cadence`] until
//! the shutdown signal flips. A tick that has started always runs to
//! completion; shutdown only prevents the next one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

// ---

/// A unit of periodic work.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run one cycle. Failures are handled and logged inside the tick.
    async fn tick(&self);
}

#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, first tick immediately.
    Every(Duration),
    /// Next occurrence of a cron expression, evaluated in UTC.
    Cron(Schedule),
}

/// Sender side of the shutdown signal shared by all timers.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawn a task calling `task.tick()` on `cadence` until `shutdown` becomes
/// `true` or its sender is dropped.
pub fn spawn_recurring<T>(
    task: Arc<T>,
    cadence: Cadence,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Tick + ?Sized,
{
    tokio::spawn(async move {
        // ---
        info!("Starting {} timer ({:?})", task.name(), cadence);
        match cadence {
            Cadence::Every(period) => {
                let mut interval = time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => task.tick().await,
                        _ = stopped(&mut shutdown) => break,
                    }
                }
            }
            Cadence::Cron(schedule) => loop {
                let Some(wait) = until_next(&schedule) else {
                    warn!("Schedule for {} has no upcoming run, stopping", task.name());
                    break;
                };
                debug!("Next {} tick in {:?}", task.name(), wait);
                tokio::select! {
                    _ = time::sleep(wait) => task.tick().await,
                    _ = stopped(&mut shutdown) => break,
                }
            },
        }
        info!("Stopped {} timer", task.name());
    })
}

fn until_next(schedule: &Schedule) -> Option<Duration> {
    // ---
    let next = schedule.upcoming(Utc).next()?;
    Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // ---
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}
