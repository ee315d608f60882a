use crate::condition::Predicate;
use crate::error::WaitError;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub struct PredicatePoller;

impl PredicatePoller {
    /// Evaluates `predicate` every `interval`, first after one interval has
    /// elapsed, until it returns true or `timeout` passes.
    ///
    /// Both timers belong to the returned future; whichever branch settles it
    /// drops the other, so the predicate is never invoked after settlement.
    /// A tick that lands on the deadline is evaluated before the timeout.
    pub async fn poll(
        predicate: &Predicate,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let start = Instant::now();
        let mut ticks = tokio::time::interval_at(start + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let expiry = tokio::time::sleep_until(start + timeout);
        tokio::pin!(expiry);

        let mut evaluations: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = ticks.tick() => {
                    evaluations += 1;
                    match predicate.evaluate() {
                        Ok(true) => {
                            debug!(evaluations, "Predicate satisfied");
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(error) => {
                            warn!(%error, evaluations, "Predicate failed");
                            return Err(error);
                        }
                    }
                }
                _ = &mut expiry => {
                    debug!(evaluations, ?timeout, "Predicate timed out");
                    return Err(WaitError::Timeout { pending: Vec::new() });
                }
            }
        }
    }
}
