use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Once-per-period tick source owned by a session driver.
///
/// Stopping drops the underlying interval, so no tick can fire afterwards.
#[derive(Debug)]
pub struct SessionTicker {
    period: Duration,
    interval: Option<Interval>,
}

impl SessionTicker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Begin ticking; the first tick fires one period from now.
    ///
    /// Ticks missed while the owner was busy fire back to back, so the number of
    /// ticks always tracks wall-clock periods since `start`.
    pub fn start(&mut self) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Pends forever while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
