//! The polling control loop.
//!
//! One sequential loop: every tick, check the active window, run a full
//! pass if inside it, then let presence decay. Cycles run to completion
//! before the next tick is honored, so camera connections never overlap.
//! Cancellation is only observed between iterations; an in-flight poll
//! always finishes its capture-to-persist sequence.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, Utc};
use log::{error, info, warn};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::pipeline::poller::WorkstationPoller;
use crate::presence;

/// Injectable time source so window gating is testable without wall-clock
/// waits.
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;
    /// Local wall time, used only for active-window gating.
    fn local_time(&self) -> NaiveTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Daily polling window, inclusive on both ends. A window whose end
/// precedes its start wraps past midnight (e.g. 22:00–06:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

pub struct SchedulerConfig {
    pub cycle_interval: Duration,
    pub window: ActiveWindow,
    pub absence_threshold: chrono::Duration,
}

/// Runs until the token is cancelled. Nothing the poller does terminates
/// this loop: a failed cycle is logged and retried on the next tick.
pub async fn run(
    poller: WorkstationPoller,
    db: Database,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.cycle_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let local = clock.local_time();
                if config.window.contains(local) {
                    match poller.run_cycle(clock.utc_now()).await {
                        Ok(stats) => {
                            if stats.failures > 0 {
                                warn!(
                                    "cycle finished with {} failures out of {} workstations",
                                    stats.failures,
                                    stats.workstations_polled
                                );
                            }
                        }
                        // Survive and retry next tick; typically the config
                        // store was unreachable at cycle start.
                        Err(err) => error!("cycle aborted: {err:#}"),
                    }
                } else {
                    info!(
                        "outside active window at {}, skipping pass",
                        local.format("%H:%M:%S")
                    );
                }

                // Presence decays on wall clock, window or not.
                if let Err(err) = presence::sweep(&db, clock.utc_now(), config.absence_threshold).await {
                    warn!("presence sweep failed: {err:#}");
                }
            }
            _ = cancel_token.cancelled() => {
                info!("scheduling loop shutting down");
                break;
            }
        }
    }
}
