use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::{Duration, Instant};

// CLOCK COMPONENT -------------------------------------------------------------

/// Microsecond-resolution monotonic clock behind the dispatch loop.
///
/// All loop timing (poll cadence, grace period, post-fire settle) goes
/// through this trait so that tests can inject virtual time instead of
/// sleeping for real.
pub trait Clock {
    /// Monotonic microseconds since the clock's origin.
    fn now_us(&self) -> u64;

    /// Pause for `dt_us` microseconds. Accuracy is expected to be on the
    /// same microsecond scale as the poll interval.
    fn wait_us(&self, dt_us: u64);
}

/// How `MonotonicClock::wait_us` passes the time.
///
/// `Spin` busy-waits on the clock, which bounds jitter far tighter than the
/// scheduler can at sub-millisecond budgets. `Sleep` yields to the OS timer
/// and is kinder to the CPU when the poll interval is long enough to afford
/// scheduler wakeup latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    Spin,
    Sleep,
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Spin
    }
}

pub struct MonotonicClock {
    origin: Instant,
    strategy: WaitStrategy,
}

impl MonotonicClock {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            origin: Instant::now(),
            strategy,
        }
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn wait_us(&self, dt_us: u64) {
        match self.strategy {
            WaitStrategy::Spin => {
                let t0 = self.now_us();
                while self.now_us() - t0 < dt_us {
                    std::hint::spin_loop();
                }
            }
            WaitStrategy::Sleep => std::thread::sleep(Duration::from_micros(dt_us)),
        }
    }
}

/// Manually-advanced clock for deterministic tests. `wait_us` jumps the
/// virtual now forward instead of blocking.
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    pub fn advance_us(&self, dt_us: u64) {
        self.now.set(self.now.get() + dt_us);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }

    fn wait_us(&self, dt_us: u64) {
        self.advance_us(dt_us);
    }
}
