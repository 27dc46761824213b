//! Injectable monotonic clock.
//!
//! No component in the core reads wall-clock time. Every construct that
//! needs milliseconds takes a [`Clock`]; callers either inject a real time
//! source or use the deterministic counter, which is how full-run
//! determinism is achieved for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{COUNTER_CLOCK_STEP_MS, STREAM_CLOCK_SKEW_MS};

/// A cloneable handle to a monotonic millisecond source.
#[derive(Clone)]
pub struct Clock {
    inner: ClockInner,
}

#[derive(Clone)]
enum ClockInner {
    /// Deterministic counter: first read 0, then 1000, 2000, ...
    Counter(Arc<AtomicU64>),
    /// Caller-injected source.
    Injected(Arc<dyn Fn() -> u64 + Send + Sync>),
}

impl Clock {
    /// Deterministic counter clock starting at 0, advancing
    /// [`COUNTER_CLOCK_STEP_MS`] per read.
    #[must_use]
    pub fn counter() -> Self {
        Self {
            inner: ClockInner::Counter(Arc::new(AtomicU64::new(0))),
        }
    }

    /// Wrap a caller-provided monotonic millisecond source.
    pub fn injected(f: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            inner: ClockInner::Injected(Arc::new(f)),
        }
    }

    /// Current monotonic milliseconds. Counter clocks advance on every read.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        match &self.inner {
            ClockInner::Counter(counter) => counter.fetch_add(COUNTER_CLOCK_STEP_MS, Ordering::SeqCst),
            ClockInner::Injected(f) => f(),
        }
    }

    /// Fork a streaming clock: starts from this clock's next reading and
    /// advances `tick_ms + 5` per tick, independent of the session clock.
    #[must_use]
    pub fn fork_stream(&self, tick_ms: u64) -> StreamClock {
        StreamClock {
            now_ms: self.now_ms(),
            step_ms: tick_ms + STREAM_CLOCK_SKEW_MS,
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            ClockInner::Counter(c) => write!(f, "Clock::counter(at={})", c.load(Ordering::SeqCst)),
            ClockInner::Injected(_) => write!(f, "Clock::injected"),
        }
    }
}

/// Tick-driven clock for a streaming settlement attempt.
///
/// Distinct from the session clock: streaming time advances only when a
/// tick completes.
#[derive(Debug, Clone)]
pub struct StreamClock {
    now_ms: u64,
    step_ms: u64,
}

impl StreamClock {
    /// Current streaming milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance by one tick and return the new reading.
    pub fn tick(&mut self) -> u64 {
        self.now_ms += self.step_ms;
        self.now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero_and_steps_by_1000() {
        let clock = Clock::counter();
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 1_000);
        assert_eq!(clock.now_ms(), 2_000);
    }

    #[test]
    fn counter_clones_share_state() {
        let clock = Clock::counter();
        let other = clock.clone();
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(other.now_ms(), 1_000);
    }

    #[test]
    fn injected_uses_caller_source() {
        let clock = Clock::injected(|| 42);
        assert_eq!(clock.now_ms(), 42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn stream_clock_advances_with_skew() {
        let clock = Clock::counter();
        let mut stream = clock.fork_stream(100);
        let start = stream.now_ms();
        assert_eq!(start, 0);
        assert_eq!(stream.tick(), 105);
        assert_eq!(stream.tick(), 210);
        // The session clock keeps its own cadence.
        assert_eq!(clock.now_ms(), 1_000);
    }
}
