//! Upload throughput estimation.

use std::time::Duration;

use tokio::time::Instant;

/// Instantaneous-throughput estimator with a minimum sampling window.
///
/// Recomputes at most once per window from the byte delta since the last
/// sample; between windows the previous label is retained so the displayed
/// rate does not jitter with every chunk.
#[derive(Debug)]
pub struct RateEstimator {
    window: Duration,
    last_time: Instant,
    last_bytes: u64,
    label: String,
}

impl RateEstimator {
    /// Create an estimator; `now` anchors the first window.
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            last_time: now,
            last_bytes: 0,
            label: "0.0 KB/s".to_string(),
        }
    }

    /// Feed the cumulative transferred byte count; returns the current
    /// label, recomputed only when a full window has elapsed.
    pub fn update(&mut self, total_bytes: u64, now: Instant) -> &str {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed >= self.window {
            let delta = total_bytes.saturating_sub(self.last_bytes);
            let rate = delta as f64 / elapsed.as_secs_f64();
            self.label = format_rate(rate);
            self.last_time = now;
            self.last_bytes = total_bytes;
        }
        &self.label
    }

    /// The most recently computed label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

fn format_rate(bytes_per_sec: f64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes_per_sec > MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else {
        format!("{:.1} KB/s", bytes_per_sec / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_computed_per_window() {
        let window = Duration::from_millis(500);
        let start = Instant::now();
        let mut estimator = RateEstimator::new(window, start);

        // 512 KiB over a full window: 1024.0 KB/s.
        let label = estimator
            .update(512 * 1024, start + Duration::from_millis(500))
            .to_string();
        assert_eq!(label, "1024.0 KB/s");

        // 2 MiB more over the next second: 2.0 MB/s.
        let label = estimator
            .update(512 * 1024 + 2 * 1024 * 1024, start + Duration::from_millis(1500))
            .to_string();
        assert_eq!(label, "2.0 MB/s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_is_retained_inside_window() {
        let window = Duration::from_millis(500);
        let start = Instant::now();
        let mut estimator = RateEstimator::new(window, start);

        estimator.update(100 * 1024, start + Duration::from_millis(500));
        let settled = estimator.label().to_string();

        // A burst 100ms later does not move the label.
        let label = estimator
            .update(90 * 1024 * 1024, start + Duration::from_millis(600))
            .to_string();
        assert_eq!(label, settled);

        // Once the window elapses, it does.
        let label = estimator
            .update(90 * 1024 * 1024, start + Duration::from_millis(1000))
            .to_string();
        assert_ne!(label, settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_label_before_first_window() {
        let mut estimator = RateEstimator::new(Duration::from_millis(500), Instant::now());
        let label = estimator
            .update(64 * 1024, Instant::now() + Duration::from_millis(100))
            .to_string();
        assert_eq!(label, "0.0 KB/s");
    }
}
