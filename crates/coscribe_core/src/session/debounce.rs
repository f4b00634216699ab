//! Cancellable deferred flush timer.

use std::time::Duration;

use tokio::time::Instant;

/// A single-deadline debounce timer with cancel-and-reschedule semantics.
///
/// At most one deadline is pending at a time: every [`Debouncer::schedule`]
/// replaces the previous deadline, so a burst of edits coalesces into one
/// firing after the configured quiet period. Driven from the driver's
/// `select!` loop; under `tokio::test(start_paused = true)` the deadline
/// runs on virtual time, which is what makes the timing testable.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Start or restart the quiet period from now.
    pub fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    /// Drop any pending deadline.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a firing is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Wait for the pending deadline, then disarm.
    ///
    /// Pends forever while disarmed; intended as a `select!` branch guarded
    /// by [`Debouncer::is_armed`].
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));
        let start = Instant::now();

        debouncer.schedule();
        assert!(debouncer.is_armed());
        debouncer.fired().await;

        assert_eq!(start.elapsed(), Duration::from_millis(2000));
        assert!(!debouncer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_coalesces_bursts() {
        // Edits at t=0, 300 and 600 with a 2000ms window: exactly one
        // firing, at 2600.
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));
        let start = Instant::now();

        debouncer.schedule();
        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.schedule();
        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.schedule();

        debouncer.fired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(2600));
        assert!(!debouncer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let mut debouncer = Debouncer::new(Duration::from_millis(2000));
        debouncer.schedule();
        debouncer.cancel();
        assert!(!debouncer.is_armed());

        // A disarmed debouncer pends; the timeout wins.
        let result =
            tokio::time::timeout(Duration::from_millis(5000), debouncer.fired()).await;
        assert!(result.is_err());
    }
}
