//! Rolling byte-rate window used for outgoing flood control.
//!
//! Traffic is accumulated into one-second buckets; the load is the total
//! over the last `samples` buckets divided by `samples`, i.e. an average
//! in bytes per second. With the defaults (256 B/s over 5 s) a burst of
//! roughly 1280 bytes goes out immediately before sends start queueing.

use std::collections::VecDeque;
use std::time::Instant;

/// Byte counts over a sliding window of one-second buckets.
#[derive(Debug, Clone)]
pub struct RateWindow {
    origin: Instant,
    samples: u64,
    /// (second index since `origin`, bytes), oldest first.
    buckets: VecDeque<(u64, u64)>,
}

impl RateWindow {
    pub fn new(origin: Instant, samples: usize) -> Self {
        let samples = samples.max(1) as u64;
        Self {
            origin,
            samples,
            buckets: VecDeque::with_capacity(samples as usize),
        }
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs()
    }

    fn prune(&mut self, current: u64) {
        while let Some(&(second, _)) = self.buckets.front() {
            if second + self.samples <= current {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Account `bytes` at `now`.
    pub fn record(&mut self, now: Instant, bytes: usize) {
        let current = self.second(now);
        self.prune(current);
        match self.buckets.back_mut() {
            Some((second, total)) if *second == current => *total += bytes as u64,
            _ => self.buckets.push_back((current, bytes as u64)),
        }
    }

    /// Average bytes per second over the window ending at `now`.
    pub fn load(&self, now: Instant) -> f64 {
        let current = self.second(now);
        let total: u64 = self
            .buckets
            .iter()
            .filter(|(second, _)| second + self.samples > current)
            .map(|(_, bytes)| bytes)
            .sum();
        total as f64 / self.samples as f64
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
