//! Fixed-cadence driver for probe cycles

use crate::monitor::SiteMonitor;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Something that can run one cycle per scheduler tick
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_cycle(&mut self);
}

#[async_trait]
impl CycleRunner for SiteMonitor {
    async fn run_cycle(&mut self) {
        SiteMonitor::run_cycle(self).await;
    }
}

/// Stops a running scheduler from anywhere
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop. A cycle in progress is allowed to finish.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Runs a cycle immediately and then once per interval.
///
/// Cycles never overlap: a cycle is awaited before the next tick is taken,
/// and ticks missed while a cycle was running are skipped.
pub struct Scheduler {
    period: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            period: period.max(Duration::from_millis(1)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Drive `runner` until stopped; returns the number of ticks that ran a cycle
    pub async fn run<R: CycleRunner + ?Sized>(mut self, runner: &mut R) -> u64 {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0;

        info!("Scheduler started, period {}s", self.period.as_secs_f64());

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    run_guarded(runner, ticks).await;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped after {} cycles", ticks);
        ticks
    }
}

/// Run one cycle, containing any panic so the next tick still happens
async fn run_guarded<R: CycleRunner + ?Sized>(runner: &mut R, tick: u64) {
    debug!("Scheduler tick {}", tick);

    if let Err(panic) = AssertUnwindSafe(runner.run_cycle()).catch_unwind().await {
        error!(
            "Probe cycle {} aborted unexpectedly: {}",
            tick,
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
