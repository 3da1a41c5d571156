//! The `do_time` elapsed-ticks accumulator: a process-wide counter driven by an external
//! periodic driver (a clock interrupt or equivalent cooperative tick) and drained by the wheel
//! engine's [`crate::Wheel::bump`].

use std::sync::atomic::{AtomicI32, Ordering};

/// A 32-bit signed atomic accumulator of elapsed clock ticks not yet applied to any wheel.
///
/// Writers call [`ElapsedTicks::add`] with release semantics; readers drain the counter with
/// [`ElapsedTicks::read_and_reset`], which acquires before exchanging. A negative exchanged
/// value can never happen under correct use and is treated as a fatal invariant violation.
#[derive(Debug, Default)]
pub struct ElapsedTicks {
    count: AtomicI32,
}

impl ElapsedTicks {
    /// Creates a fresh accumulator at zero.
    pub const fn new() -> Self {
        ElapsedTicks {
            count: AtomicI32::new(0),
        }
    }

    /// Adds `n` ticks, release semantics.
    pub fn add(&self, n: i32) {
        self.count.fetch_add(n, Ordering::Release);
    }

    /// Reads the current tick count, acquire semantics, without resetting it.
    ///
    /// Used by [`crate::Wheel::set`] to fold the not-yet-applied backlog into a newly inserted
    /// timer's tick count, so it does not fire early relative to timers already resident in the
    /// wheel once that backlog is eventually drained by a bump.
    pub fn read(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Atomically exchanges the counter with zero and returns the previous value.
    ///
    /// Aborts the process if the drained value is negative: that can only happen if this
    /// counter was corrupted, which is not a recoverable condition.
    pub fn read_and_reset(&self) -> i32 {
        let prev = self.count.swap(0, Ordering::AcqRel);
        if prev < 0 {
            crate::fatal!("do_time exchanged a negative value: {prev}");
        }
        prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_drain() {
        let dt = ElapsedTicks::new();
        dt.add(3);
        dt.add(4);
        assert_eq!(dt.read(), 7);
        assert_eq!(dt.read_and_reset(), 7);
        assert_eq!(dt.read(), 0);
    }

    #[test]
    fn drain_of_zero_is_zero() {
        let dt = ElapsedTicks::new();
        assert_eq!(dt.read_and_reset(), 0);
    }
}
