//! Cooperative timer engine.
//!
//! Timers are plain records polled once per driver tick by
//! [`Scheduler::process`]; nothing runs in the background. Callbacks get
//! the scheduler itself (to create or cancel timers, including their own)
//! and the application context `C`.
//!
//! Firing rules:
//! - only timers already due when `process` starts are considered, in
//!   next-run order, so a timer created by a callback never fires in the
//!   same pass;
//! - a timer cancelled by an earlier callback in the same pass is skipped;
//! - a callback that returns an error takes only its own timer down.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::telemetry::spans;

/// Timer identifier; monotonically increasing, never reused.
pub type TimerId = u64;

/// Timer callback.
pub type Callback<C> = Box<dyn FnMut(&mut Scheduler<C>, &mut C) -> anyhow::Result<()>>;

/// One-shot or repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once, then is removed.
    Timeout,
    /// Re-arms to `now + interval` after every firing.
    Interval,
}

/// Snapshot of a live timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub id: TimerId,
    pub kind: TimerKind,
    pub interval: Duration,
    pub next_run: Instant,
    pub label: Option<String>,
}

struct TimerRecord<C> {
    kind: TimerKind,
    interval: Duration,
    next_run: Instant,
    label: Option<String>,
    /// `None` only while the callback is running.
    callback: Option<Callback<C>>,
}

/// Timer table polled by the driver loop.
pub struct Scheduler<C> {
    clock: SharedClock,
    timers: BTreeMap<TimerId, TimerRecord<C>>,
    next_id: TimerId,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.timers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<C> Scheduler<C> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            timers: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Schedule `callback` after `delay`; intervals repeat every `delay`.
    pub fn create<F>(&mut self, delay: Duration, kind: TimerKind, callback: F) -> TimerId
    where
        F: FnMut(&mut Scheduler<C>, &mut C) -> anyhow::Result<()> + 'static,
    {
        self.insert(delay, kind, None, Box::new(callback))
    }

    /// Like [`create`](Self::create), with a label shown in listings and logs.
    pub fn create_labeled<F>(
        &mut self,
        label: impl Into<String>,
        delay: Duration,
        kind: TimerKind,
        callback: F,
    ) -> TimerId
    where
        F: FnMut(&mut Scheduler<C>, &mut C) -> anyhow::Result<()> + 'static,
    {
        self.insert(delay, kind, Some(label.into()), Box::new(callback))
    }

    fn insert(
        &mut self,
        delay: Duration,
        kind: TimerKind,
        label: Option<String>,
        callback: Callback<C>,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            TimerRecord {
                kind,
                interval: delay,
                next_run: self.clock.now() + delay,
                label,
                callback: Some(callback),
            },
        );
        id
    }

    /// Cancel a timer. Returns `false` if it did not exist.
    pub fn destroy(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Fire every due timer once. Returns the number of callbacks run.
    pub fn process(&mut self, cx: &mut C) -> usize {
        let now = self.clock.now();
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.next_run <= now)
            .map(|(id, t)| (t.next_run, *id))
            .collect();
        due.sort_unstable();

        let mut fired = 0;
        for (_, id) in due {
            let Some(record) = self.timers.get_mut(&id) else {
                continue;
            };
            let Some(mut callback) = record.callback.take() else {
                continue;
            };
            let kind = record.kind;
            let span = spans::timer(id, record.label.as_deref());
            let _enter = span.enter();

            let result = callback(self, cx);
            fired += 1;

            match result {
                Err(error) => {
                    warn!(timer = id, error = %error, "timer callback failed, timer destroyed");
                    self.timers.remove(&id);
                }
                Ok(()) if kind == TimerKind::Timeout => {
                    self.timers.remove(&id);
                }
                Ok(()) => {
                    // Absent if the callback cancelled its own timer.
                    if let Some(record) = self.timers.get_mut(&id) {
                        record.callback = Some(callback);
                        record.next_run = now + record.interval;
                    }
                }
            }
        }

        if fired > 0 {
            debug!(fired, active = self.timers.len(), "timers processed");
        }
        fired
    }

    /// Live timers ordered by next run.
    pub fn list_active(&self) -> Vec<TimerInfo> {
        let mut list: Vec<TimerInfo> = self
            .timers
            .iter()
            .map(|(id, t)| TimerInfo {
                id: *id,
                kind: t.kind,
                interval: t.interval,
                next_run: t.next_run,
                label: t.label.clone(),
            })
            .collect();
        list.sort_by_key(|t| (t.next_run, t.id));
        list
    }
}
