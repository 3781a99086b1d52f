//! Fixed-cadence trigger for dispatch cycles.

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Drives [`Dispatcher::run_cycle`] on the configured poll interval.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let poll_interval = dispatcher.config().poll_interval;
        Self {
            dispatcher,
            poll_interval,
        }
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// The first cycle starts immediately. A cycle that overruns the interval
    /// swallows the ticks it missed instead of bursting. A cycle in progress
    /// when shutdown fires is allowed to finish. Returns the number of cycles
    /// that completed.
    pub async fn run<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            destination = %self.dispatcher.config().destination,
            "Starting dispatch scheduler"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut completed = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(cycles = completed, "Shutdown requested, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    match self.dispatcher.run_cycle().await {
                        Ok(report) => {
                            completed += 1;
                            debug!(fetched = report.fetched, "Cycle finished");
                        }
                        Err(DispatchError::CycleInFlight) => {
                            debug!("Previous cycle still running");
                        }
                        Err(e) => {
                            // The next tick tries again.
                            error!(error = %e, "Dispatch cycle failed");
                        }
                    }
                }
            }
        }

        completed
    }
}
