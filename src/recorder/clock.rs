//! Wall-clock sources and drift-tolerant polling timers.
//!
//! Controllers never count ticks: every duration is the delta between two
//! readings of an injected [`Clock`]. [`PollTimer`] only decides *when* a
//! controller samples that clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of "now" for elapsed/position math.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared clock handle injected into every controller.
pub type SharedClock = Arc<dyn Clock>;

/// Monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        *self.offset.lock() += step;
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Periodic callback schedule checked on every façade tick.
///
/// After firing, the next deadline is computed from the observed `now`, not
/// from the previous deadline, so a late tick never causes a burst of
/// catch-up firings.
#[derive(Debug, Clone)]
pub struct PollTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_due: None }
    }

    /// Start (or restart) the schedule; first firing is one interval from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    /// Stop the schedule. Returns whether the timer was armed.
    pub fn cancel(&mut self) -> bool {
        self.next_due.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` when the timer is due at `now` and reschedules it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
