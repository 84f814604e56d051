//! Sliding-window update rate.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Default window width in seconds.
pub const THROUGHPUT_WINDOW_SECS: u64 = 10;

/// Longest window accepted by the feed's sliding windows.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Counts accepted ticks over the trailing window.
///
/// The rate is `entries in window / window seconds`, so a burst is smoothed
/// over the whole window and an idle stream decays to zero once its last
/// entry ages out.
#[derive(Debug, Clone)]
pub struct ThroughputMonitor {
    samples: VecDeque<DateTime<Utc>>,
    window: Duration,
    window_secs: f64,
}

impl ThroughputMonitor {
    pub fn new(window_secs: u64) -> Self {
        let window_secs = window_secs.clamp(1, MAX_WINDOW_SECS);
        Self {
            samples: VecDeque::new(),
            window: Duration::seconds(window_secs as i64),
            window_secs: window_secs as f64,
        }
    }

    /// Record one update at `now` and discard entries that left the window.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.samples.push_back(now);
        self.trim(now);
    }

    fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.samples.front().is_some_and(|t| *t <= cutoff) {
            self.samples.pop_front();
        }
    }

    /// Entries inside the window ending at `now`.
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        self.samples.iter().filter(|t| **t > cutoff).count()
    }

    /// Updates per second over the window ending at `now`.
    pub fn rate(&self, now: DateTime<Utc>) -> f64 {
        self.count(now) as f64 / self.window_secs
    }
}

impl Default for ThroughputMonitor {
    fn default() -> Self {
        Self::new(THROUGHPUT_WINDOW_SECS)
    }
}
