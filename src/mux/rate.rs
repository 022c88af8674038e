//! Sliding-window rate estimator for one subscription. Pure data structure,
//! no I/O — tested in isolation the same way `discovery::merge` is.

use std::collections::VecDeque;
use std::time::Instant;

use crate::discovery::constants::RATE_WINDOW;

/// Ring buffer of the last `RATE_WINDOW` arrival timestamps for one
/// subscription. `rate_hz` is `(K-1) / (t_last - t_first)` once the buffer
/// is full; for fewer samples it's the same formula over however many
/// timestamps have been observed, giving a linear estimate that converges
/// to the steady-state formula as the buffer fills.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    arrivals: VecDeque<Instant>,
}

impl RateEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            arrivals: VecDeque::with_capacity(RATE_WINDOW),
        }
    }

    /// Records one arrival at `now`, evicting the oldest timestamp once the
    /// window is full.
    pub fn record(&mut self, now: Instant) {
        if self.arrivals.len() == RATE_WINDOW {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(now);
    }

    /// Current rate estimate in Hz. `None` until at least two samples have
    /// arrived (a single timestamp has no interval to measure against).
    #[must_use]
    pub fn rate_hz(&self) -> Option<f64> {
        let n = self.arrivals.len();
        if n < 2 {
            return None;
        }
        let first = *self.arrivals.front().unwrap();
        let last = *self.arrivals.back().unwrap();
        let span = last.saturating_duration_since(first).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        Some((n - 1) as f64 / span)
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
