//! Scheduler (§4.10): a cooperative periodic task runner. Ticks at a fixed
//! interval, tolerates up to three consecutive failures with an
//! exponentially increasing delay before retrying, and shuts down only
//! after the in-flight tick finishes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Consecutive-failure tolerance of §4.10 before the scheduler's backoff
/// kicks in; the task itself is never abandoned.
const FAILURE_TOLERANCE: u32 = 3;

/// A periodic task with an abort + cooperative-stop handle. `task` is
/// invoked on every tick; `on_failure` is called after each tick that
/// returns `Err`, with the consecutive failure count.
pub struct Scheduler {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduler loop. `interval` is the nominal tick period;
    /// `task` runs once per tick and `on_failure` is invoked on each failed
    /// tick (e.g. to bump a metric) with the current consecutive-failure
    /// count.
    pub fn spawn<F, Fut, E, OnFail>(interval: Duration, mut task: F, mut on_failure: OnFail) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
        E: std::fmt::Display,
        OnFail: FnMut(u32) + Send + 'static,
    {
        let stop = Arc::new(Notify::new());
        let stop_for_task = stop.clone();

        let handle = tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                let tick = tokio::select! {
                    biased;
                    _ = stop_for_task.notified() => break,
                    result = task() => result,
                };

                match tick {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        on_failure(consecutive_failures);
                        tracing::error!(%err, consecutive_failures, "scheduled task failed");
                    }
                }

                let delay = next_delay(interval, consecutive_failures);
                tokio::select! {
                    biased;
                    _ = stop_for_task.notified() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        Self { stop, handle }
    }

    /// Ask the task to stop after its current tick finishes, and wait for
    /// it to actually exit.
    pub async fn stop(self) {
        self.stop.notify_one();
        let _ = self.handle.await;
    }
}

/// Within tolerance: tick at the nominal interval. Beyond it: back off
/// exponentially from the nominal interval, capped at ten times it, so a
/// persistently broken dependency (DB down, RPC down) doesn't busy-loop.
fn next_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures <= FAILURE_TOLERANCE {
        return interval;
    }
    let backoff_steps = consecutive_failures - FAILURE_TOLERANCE;
    let scaled = interval.saturating_mul(1u32 << backoff_steps.min(4));
    scaled.min(interval * 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_is_nominal_within_tolerance() {
        let interval = Duration::from_secs(1);
        assert_eq!(next_delay(interval, 0), interval);
        assert_eq!(next_delay(interval, FAILURE_TOLERANCE), interval);
    }

    #[test]
    fn delay_backs_off_exponentially_past_tolerance() {
        let interval = Duration::from_secs(1);
        let first = next_delay(interval, FAILURE_TOLERANCE + 1);
        let second = next_delay(interval, FAILURE_TOLERANCE + 2);
        assert!(first < second);
        assert!(second <= interval * 10);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_tick() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_for_task = ticks.clone();
        let scheduler = Scheduler::spawn(
            Duration::from_millis(5),
            move || {
                let ticks = ticks_for_task.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            },
            |_| {},
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop().await;
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
