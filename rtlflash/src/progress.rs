//! Download progress reporting.
//!
//! The core is strictly single-threaded, so progress is exported as a single
//! shared percentage an external poller (a CLI progress bar, a GUI timer) can
//! read while a download runs on another thread. Every update is one atomic
//! store; a concurrent reader never observes a torn value. There is no
//! notification primitive, polling cadence is the observer's business.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared download percentage, 0..=100.
///
/// Clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    percent: Arc<AtomicU32>,
}

impl ProgressCounter {
    /// Create a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current percentage.
    #[must_use]
    pub fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    fn set(&self, percent: u32) {
        self.percent.store(percent.min(100), Ordering::Relaxed);
    }
}

/// Cumulative byte counter behind a [`ProgressCounter`].
///
/// One tracker spans the whole download, so the percentage aggregates the
/// firmware and image transfers against their combined size.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total: u64,
    sent: u64,
    counter: ProgressCounter,
}

impl ProgressTracker {
    pub(crate) fn new(total: u64, counter: ProgressCounter) -> Self {
        Self {
            total,
            sent: 0,
            counter,
        }
    }

    /// Record `bytes` more transferred and publish the new percentage.
    #[allow(clippy::cast_possible_truncation)] // percentage is <= 100
    pub(crate) fn advance(&mut self, bytes: u64) {
        self.sent += bytes;
        if self.total > 0 {
            self.counter.set((self.sent * 100 / self.total) as u32);
        }
    }

    #[cfg(test)]
    pub(crate) fn sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero() {
        assert_eq!(ProgressCounter::new().percent(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let counter = ProgressCounter::new();
        let observer = counter.clone();

        let mut tracker = ProgressTracker::new(200, counter);
        tracker.advance(50);
        assert_eq!(observer.percent(), 25);
        tracker.advance(150);
        assert_eq!(observer.percent(), 100);
        assert_eq!(tracker.sent(), 200);
    }

    #[test]
    fn test_progress_is_monotonic_per_chunk() {
        let counter = ProgressCounter::new();
        let observer = counter.clone();
        let mut tracker = ProgressTracker::new(1000, counter);

        let mut last = 0;
        for _ in 0..10 {
            tracker.advance(100);
            let now = observer.percent();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_zero_total_never_divides() {
        let counter = ProgressCounter::new();
        let mut tracker = ProgressTracker::new(0, counter.clone());
        tracker.advance(10);
        assert_eq!(counter.percent(), 0);
    }
}
