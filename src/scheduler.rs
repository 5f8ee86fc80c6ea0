use crate::prelude::*;
use crate::coordinator::{Outcome, Session};

use tokio::time::MissedTickBehavior;

/// Drives a [`Session`] with periodic, non-blocking ticks.
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(config: &ConfigWrapper) -> Self {
        Self::with_interval(config.timing().tick())
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Ticks `session` until its active workflow reaches a terminal state.
    ///
    /// Returns straight away with the last outcome if nothing is running.
    pub async fn run(&self, session: &mut Session) -> Option<Outcome> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            if let Some(outcome) = session.tick() {
                return Some(outcome);
            }

            if session.is_idle() {
                return session.last_outcome().cloned();
            }
        }
    }
}
