//! Per-socket traffic counters.

use std::ops::AddAssign;

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Counters for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub lines: u64,
    pub bytes: u64,
}

impl Counter {
    pub(crate) fn add(&mut self, bytes: usize) {
        self.lines += 1;
        self.bytes += bytes as u64;
    }
}

impl AddAssign for Counter {
    fn add_assign(&mut self, rhs: Self) {
        self.lines += rhs.lines;
        self.bytes += rhs.bytes;
    }
}

/// Snapshot returned by `Socket::statistics`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub incoming: Counter,
    pub outgoing: Counter,
    /// Lines waiting in the flood-control queue.
    pub queued: usize,
    /// Incoming lines dropped for exceeding the length limit.
    pub dropped: u64,
    /// Current rolling average, bytes per second.
    pub load_in: f64,
    pub load_out: f64,
}

impl AddAssign<&Statistics> for Statistics {
    fn add_assign(&mut self, rhs: &Statistics) {
        self.incoming += rhs.incoming;
        self.outgoing += rhs.outgoing;
        self.queued += rhs.queued;
        self.dropped += rhs.dropped;
        self.load_in += rhs.load_in;
        self.load_out += rhs.load_out;
    }
}
