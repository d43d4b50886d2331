//! Throughput and latency statistics
//!
//! Counters only grow between resets. Latency is smoothed with a fixed-factor
//! exponential moving average shared by all devices.

use parking_lot::Mutex;
use serde::Serialize;

/// Weight of a new sample in the latency EMA
pub const LATENCY_SMOOTHING: f64 = 0.1;

/// Consistent snapshot of the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
    /// EMA of arrival latency in milliseconds
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub last_latency_ms: f64,
}

/// Statistics guarded by their own lock, independent of queue and history
#[derive(Debug, Default)]
pub struct StatisticsTracker {
    inner: Mutex<Statistics>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.inner.lock().received += 1;
    }

    pub fn record_sent(&self) {
        self.inner.lock().sent += 1;
    }

    pub fn record_dropped(&self) {
        self.inner.lock().dropped += 1;
    }

    /// Fold a latency sample into the estimate; returns the new average
    pub fn record_latency(&self, sample_ms: f64) -> f64 {
        let sample_ms = sample_ms.max(0.0);
        let mut stats = self.inner.lock();
        stats.average_latency_ms =
            (1.0 - LATENCY_SMOOTHING) * stats.average_latency_ms + LATENCY_SMOOTHING * sample_ms;
        stats.max_latency_ms = stats.max_latency_ms.max(sample_ms);
        stats.last_latency_ms = sample_ms;
        stats.average_latency_ms
    }

    pub fn snapshot(&self) -> Statistics {
        *self.inner.lock()
    }

    /// Zero every counter and estimate in one step
    pub fn reset(&self) {
        *self.inner.lock() = Statistics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let stats = StatisticsTracker::new();
        stats.record_received();
        stats.record_received();
        stats.record_sent();
        stats.record_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.dropped, 1);
    }

    #[test]
    fn test_latency_ema() {
        let stats = StatisticsTracker::new();
        assert!((stats.record_latency(10.0) - 1.0).abs() < 1e-9);
        assert!((stats.record_latency(10.0) - 1.9).abs() < 1e-9);

        let snap = stats.snapshot();
        assert_eq!(snap.max_latency_ms, 10.0);
        assert_eq!(snap.last_latency_ms, 10.0);
    }

    #[test]
    fn test_negative_latency_clamped() {
        let stats = StatisticsTracker::new();
        stats.record_latency(-5.0);
        assert_eq!(stats.snapshot().average_latency_ms, 0.0);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = StatisticsTracker::new();
        stats.record_received();
        stats.record_latency(3.0);
        stats.reset();
        assert_eq!(stats.snapshot(), Statistics::default());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(StatisticsTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().received, 4000);
    }
}
