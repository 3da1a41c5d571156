//! The "now" family of operations: `deliver_time`, `get_now`, `get_sys_now`, `get_timeval`,
//! `get_time`, `get_approx_time`, `time_remaining`.
//!
//! Grounded on `erl_time_sup.c`'s `erts_deliver_time`/`erts_get_now`/`erts_get_approx_time`: a
//! TTOD sample feeds both the wheel ring's elapsed-tick accumulator (`deliver_time`) and a
//! strictly monotonic "erlang now" fence (`get_now`), with a cheap lock-free "approximate
//! seconds" publication for callers that don't need microsecond precision or monotonicity.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use runtime_time_ttod::Dispatcher;
use runtime_time_wheel::WheelSet;

/// A `{sec, usec}` pair, the shape `erl_time_sup.c`'s `SysTimeval` takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

/// An erlang-style `{mega, sec, micro}` timestamp, where `mega * 1_000_000 + sec` is the whole
/// second count and `micro` is the sub-second remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NowTimestamp {
    pub mega: i64,
    pub sec: i64,
    pub micro: i64,
}

fn split_micros(total_micros: u64) -> NowTimestamp {
    let total_secs = (total_micros / 1_000_000) as i64;
    NowTimestamp {
        mega: total_secs / 1_000_000,
        sec: total_secs % 1_000_000,
        micro: (total_micros % 1_000_000) as i64,
    }
}

pub(crate) struct ClockState {
    dispatcher: Dispatcher,
    last_delivered_ms: AtomicU64,
    monotonic_fence_us: AtomicU64,
    approx_seconds: AtomicI64,
    clock_resolution_ms: u32,
}

impl ClockState {
    pub(crate) fn new(dispatcher: Dispatcher, clock_resolution_ms: u32) -> Self {
        let now_us = dispatcher.sample_micros();
        ClockState {
            dispatcher,
            last_delivered_ms: AtomicU64::new(now_us / 1_000),
            monotonic_fence_us: AtomicU64::new(now_us),
            approx_seconds: AtomicI64::new((now_us / 1_000_000) as i64),
            clock_resolution_ms,
        }
    }

    pub(crate) fn active_strategy_name(&self) -> Option<&'static str> {
        self.dispatcher.active_strategy_name()
    }

    /// Fetches the current TTOD, folds whole resolution-ticks elapsed since the last call into
    /// `wheel_set`'s `do_time` accumulator, and republishes `last_delivered_ms`. A negative
    /// (backwards) delta is silently treated as zero rather than underflowing the accumulator.
    pub(crate) fn deliver_time(&self, wheel_set: &WheelSet) {
        let now_ms = self.dispatcher.sample_micros() / 1_000;
        let last_ms = self.last_delivered_ms.load(Ordering::Relaxed);
        let resolution = u64::from(self.clock_resolution_ms).max(1);

        if now_ms < last_ms {
            log::trace!("deliver_time: TTOD moved backwards, treating elapsed as zero");
            return;
        }

        let elapsed_ticks = (now_ms - last_ms) / resolution;
        if elapsed_ticks == 0 {
            return;
        }
        if let Ok(ticks) = i32::try_from(elapsed_ticks) {
            wheel_set.do_time_add(ticks);
        } else {
            wheel_set.do_time_add(i32::MAX);
        }
        self.last_delivered_ms
            .store(last_ms + elapsed_ticks * resolution, Ordering::Relaxed);
    }

    /// TTOD in microseconds, strictly monotonic across every thread and call: if the fresh
    /// sample does not exceed the last value ever returned, the fence is advanced by one
    /// microsecond instead.
    pub(crate) fn get_now(&self) -> NowTimestamp {
        let mut prev = self.monotonic_fence_us.load(Ordering::Acquire);
        loop {
            let sample = self.dispatcher.sample_micros();
            let candidate = if sample > prev { sample } else { prev + 1 };
            match self.monotonic_fence_us.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.approx_seconds
                        .store((candidate / 1_000_000) as i64, Ordering::Relaxed);
                    return split_micros(candidate);
                }
                Err(actual) => prev = actual,
            }
        }
    }

    /// Raw TTOD sample, with no monotonicity enforcement: two calls in quick succession may
    /// return the same or even a slightly earlier value if the underlying strategy resyncs.
    pub(crate) fn get_sys_now(&self) -> NowTimestamp {
        split_micros(self.dispatcher.sample_micros())
    }

    pub(crate) fn get_timeval(&self) -> Timeval {
        let now = self.get_now();
        Timeval {
            sec: now.mega * 1_000_000 + now.sec,
            usec: now.micro,
        }
    }

    pub(crate) fn get_time(&self) -> i64 {
        let now = self.get_now();
        now.mega * 1_000_000 + now.sec
    }

    /// Lock-free read of the seconds published by the most recent [`ClockState::get_now`] call.
    pub(crate) fn get_approx_time(&self) -> i64 {
        self.approx_seconds.load(Ordering::Relaxed)
    }

    /// Time remaining until the next timer fires across `wheel_set`, as a [`Timeval`]. Capped at
    /// 100,000 seconds when no wheel has any active timer, matching the original's "nothing
    /// pending, sleep a long but bounded time" convention.
    pub(crate) fn time_remaining(&self, wheel_set: &WheelSet) -> Timeval {
        const NO_TIMERS_CAP_SEC: i64 = 100_000;
        match wheel_set.next_time() {
            Some(ticks) => {
                let ms = u64::from(ticks) * u64::from(self.clock_resolution_ms);
                Timeval {
                    sec: (ms / 1_000) as i64,
                    usec: ((ms % 1_000) * 1_000) as i64,
                }
            }
            None => Timeval {
                sec: NO_TIMERS_CAP_SEC,
                usec: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_time_ttod::sample::StubStrategy;
    use runtime_time_ttod::strategy::TtodOutcome;
    use std::sync::Arc;
    use std::sync::Barrier;

    fn fixed_dispatcher(values: Vec<TtodOutcome>) -> Dispatcher {
        let mut d = Dispatcher::empty();
        d.push(Box::new(StubStrategy::new("fixed", true, values)));
        d
    }

    #[test]
    fn get_now_is_monotonic_even_when_samples_repeat() {
        let values = vec![TtodOutcome::Micros(1_000); 5];
        let dispatcher = fixed_dispatcher(values);
        let state = ClockState::new(dispatcher, 1);
        let mut last = 0i64;
        for _ in 0..5 {
            let now = state.get_now();
            let total = now.mega * 1_000_000_000_000 + now.sec * 1_000_000 + now.micro;
            assert!(total > last, "get_now failed to advance: {total} <= {last}");
            last = total;
        }
    }

    #[test]
    fn get_now_is_monotonic_across_threads() {
        let values: Vec<_> = std::iter::repeat(TtodOutcome::Micros(42)).take(10_000).collect();
        let dispatcher = fixed_dispatcher(values);
        let state = Arc::new(ClockState::new(dispatcher, 1));
        let barrier = Arc::new(Barrier::new(8));
        let results: Arc<std::sync::Mutex<Vec<i64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let state = state.clone();
                let barrier = barrier.clone();
                let results = results.clone();
                scope.spawn(move || {
                    barrier.wait();
                    let mut local = Vec::with_capacity(1_250);
                    for _ in 0..1_250 {
                        let now = state.get_now();
                        local.push(now.mega * 1_000_000_000_000 + now.sec * 1_000_000 + now.micro);
                    }
                    results.lock().unwrap().extend(local);
                });
            }
        });

        let mut all = results.lock().unwrap().clone();
        all.sort_unstable();
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1], "monotonicity violated: {:?}", pair);
        }
    }

    #[test]
    fn get_approx_time_reflects_last_get_now() {
        let dispatcher = fixed_dispatcher(vec![TtodOutcome::Micros(5_000_000)]);
        let state = ClockState::new(dispatcher, 1);
        let now = state.get_now();
        assert_eq!(state.get_approx_time(), now.mega * 1_000_000 + now.sec);
    }
}
