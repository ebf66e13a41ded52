//! Periodic driver: the fixed-cadence background work.
//!
//! Three independent timers, all sharing the store with the dispatch
//! endpoint:
//! - daily at 00:00 (and once at startup): materialize every feeder's
//!   due occurrences into the queue;
//! - every minute at :00: safety-net sweep that drains globally due
//!   entries, for feeders that never poll;
//! - every minute at :59, only when configured: synthetic consumption
//!   injection for one feeder, exercising the hourly-bucket path.
//!
//! The sweep and a device's own poll can drain the same entry;
//! `acknowledge` treating a missing entry as a no-op is what makes that
//! race harmless. No failure here is fatal: a bad feeder is logged and
//! skipped, and the loops run until shutdown.

use std::time::Duration as StdDuration;

use chrono::{Duration, Local, NaiveDateTime, NaiveTime, Timelike};
use rand::Rng;
use smartfeeder_shared::domain::FeederStatus;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::EventQueue;
use crate::schedule::ScheduleService;
use crate::storage::{Store, hour_bucket};

#[derive(Clone)]
pub struct Driver {
    store: Store,
    schedule: ScheduleService,
    queue: EventQueue,
    /// Product key of the feeder receiving synthetic consumption, if any.
    simulate_feeder: Option<String>,
    shutdown: CancellationToken,
}

impl Driver {
    pub fn new(
        store: Store,
        schedule: ScheduleService,
        queue: EventQueue,
        simulate_feeder: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            schedule,
            queue,
            simulate_feeder,
            shutdown,
        }
    }

    /// Run an initial materialization pass, then spawn the timer loops.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.materialize_all(Local::now().naive_local()).await;

            let daily = {
                let driver = self.clone();
                tokio::spawn(async move { driver.daily_loop().await })
            };
            let sweep = {
                let driver = self.clone();
                tokio::spawn(async move { driver.sweep_loop().await })
            };
            let sim = self.simulate_feeder.is_some().then(|| {
                let driver = self.clone();
                tokio::spawn(async move { driver.simulation_loop().await })
            });

            let _ = daily.await;
            let _ = sweep.await;
            if let Some(sim) = sim {
                let _ = sim.await;
            }
        })
    }

    async fn daily_loop(&self) {
        loop {
            let wait = until_next_midnight(Local::now().naive_local());
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.materialize_all(Local::now().naive_local()).await;
        }
        debug!("driver: daily loop stopped");
    }

    async fn sweep_loop(&self) {
        loop {
            let wait = until_second_of_minute(Local::now().naive_local(), 0);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.sweep_due(Local::now().naive_local()).await;
        }
        debug!("driver: sweep loop stopped");
    }

    async fn simulation_loop(&self) {
        loop {
            let wait = until_second_of_minute(Local::now().naive_local(), 59);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.inject_consumption(Local::now().naive_local()).await;
        }
        debug!("driver: simulation loop stopped");
    }

    /// Materialize today's occurrences for every feeder and enqueue
    /// them. A failing feeder is skipped, never the whole pass.
    pub async fn materialize_all(&self, now: NaiveDateTime) {
        let feeders = match self.store.list_feeders().await {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "materialization: listing feeders failed");
                return;
            }
        };
        for feeder in feeders {
            match self.schedule.materialize_today(feeder.id, now).await {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => match self.queue.enqueue(entries).await {
                    Ok(n) => info!(feeder = feeder.id, enqueued = n, "materialization: queued"),
                    Err(e) => {
                        warn!(feeder = feeder.id, error = %e, "materialization: enqueue failed");
                    }
                },
                Err(e) => warn!(feeder = feeder.id, error = %e, "materialization: skipping feeder"),
            }
        }
    }

    /// Drain every globally due entry, logging each as dispensed.
    pub async fn sweep_due(&self, now: NaiveDateTime) {
        let due = match self.queue.due_entries(now).await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "sweep: queue read failed");
                return;
            }
        };
        for entry in due {
            match self.queue.acknowledge(entry.id, FeederStatus::Ok, now).await {
                Ok(true) => {
                    info!(
                        feeder = entry.feeder_id,
                        entry = entry.id,
                        count = entry.count,
                        address = %entry.address,
                        "sweep: dispensed"
                    );
                }
                Ok(false) => debug!(entry = entry.id, "sweep: already drained"),
                Err(e) => warn!(entry = entry.id, error = %e, "sweep: acknowledge failed"),
            }
        }
    }

    async fn inject_consumption(&self, now: NaiveDateTime) {
        let Some(key) = self.simulate_feeder.as_deref() else {
            return;
        };
        let feeder = match self.store.get_feeder_by_product_key(key).await {
            Ok(Some(f)) => f,
            Ok(None) => {
                warn!(product_key = key, "simulation: feeder not found");
                return;
            }
            Err(e) => {
                error!(error = %e, "simulation: feeder lookup failed");
                return;
            }
        };
        let delta: i32 = rand::rng().random_range(0..=5);
        debug!(feeder = feeder.id, delta, "simulation: injecting consumption");
        if let Err(e) = self
            .store
            .add_consumption(feeder.id, hour_bucket(now), delta)
            .await
        {
            warn!(feeder = feeder.id, error = %e, "simulation: consumption log failed");
        }
    }
}

fn until_next_midnight(now: NaiveDateTime) -> StdDuration {
    let Some(tomorrow) = now.date().succ_opt() else {
        // end of the calendar; just idle
        return StdDuration::from_secs(60);
    };
    (tomorrow.and_time(NaiveTime::MIN) - now)
        .to_std()
        .unwrap_or(StdDuration::from_secs(1))
}

/// Time until the next wall-clock instant whose seconds hand reads
/// `second`.
fn until_second_of_minute(now: NaiveDateTime, second: u32) -> StdDuration {
    let this_minute = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let mut target = this_minute + Duration::seconds(i64::from(second));
    if target <= now {
        target += Duration::seconds(60);
    }
    (target - now).to_std().unwrap_or(StdDuration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn midnight_wait() {
        assert_eq!(
            until_next_midnight(dt(23, 59, 30)),
            StdDuration::from_secs(30)
        );
        assert_eq!(
            until_next_midnight(dt(0, 0, 0)),
            StdDuration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn minute_alignment() {
        assert_eq!(
            until_second_of_minute(dt(10, 15, 20), 0),
            StdDuration::from_secs(40)
        );
        assert_eq!(
            until_second_of_minute(dt(10, 15, 20), 59),
            StdDuration::from_secs(39)
        );
        // exactly on the boundary waits a full minute
        assert_eq!(
            until_second_of_minute(dt(10, 15, 0), 0),
            StdDuration::from_secs(60)
        );
    }
}
