//! Shared shape for the MACH/HRT/HPET/UPT strategies: a monotonic counter whose correction bias
//! is re-synced periodically, with the correction **suppressed** to at most a fraction of the
//! real elapsed time per resync, so a single bad measurement cannot cause a large step.
//!
//! Grounded on `ttod_impl_hrt.h`'s `get_ttod_hrt`; the other three strategies in the original
//! (`ttod_impl_mach.h`, `ttod_impl_hpet.h`, `ttod_impl_upt.h`) are the same shape again, differing
//! only in which counter is read and what granularity it runs at, exactly as spec.md §4.B
//! describes them.

use atomic::{Atomic, Ordering};

use crate::strategy::{TtodOutcome, TtodStrategy};

/// A monotonic tick source this strategy resyncs against.
pub trait TickSource: Send + Sync {
    /// Ticks since an arbitrary fixed epoch (process start is fine); must not go backwards in a
    /// healthy system.
    fn ticks(&self) -> i64;
    /// Ticks per second.
    fn freq_hz(&self) -> i64;
    /// Whether this source (and thus the strategy wrapping it) is usable on this process.
    fn available(&self) -> bool {
        true
    }
}

struct InstantSource {
    epoch: std::time::Instant,
    freq_hz: i64,
}

impl InstantSource {
    fn new(freq_hz: i64) -> Self {
        InstantSource {
            epoch: std::time::Instant::now(),
            freq_hz,
        }
    }
}

impl TickSource for InstantSource {
    fn ticks(&self) -> i64 {
        let elapsed = self.epoch.elapsed();
        match self.freq_hz {
            1_000_000_000 => elapsed.as_nanos() as i64,
            1_000 => elapsed.as_millis() as i64,
            hz => (elapsed.as_secs_f64() * hz as f64) as i64,
        }
    }
    fn freq_hz(&self) -> i64 {
        self.freq_hz
    }
}

fn now_in_unit(unit_per_sec: i64) -> i64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    match unit_per_sec {
        1_000_000_000 => dur.as_nanos() as i64,
        1_000 => dur.as_millis() as i64,
        hz => (dur.as_secs_f64() * hz as f64) as i64,
    }
}

/// A suppressed-correction TTOD strategy parameterized by unit granularity (nanoseconds for
/// HRT/MACH/HPET, milliseconds for UPT) and a [`TickSource`].
pub struct SuppressedStrategy {
    name: &'static str,
    unit_per_sec: i64,
    resync_after: i64,
    resync_threshold: i64,
    source: Box<dyn TickSource>,

    init: Atomic<(i64, i64)>,  // (tick, tod) fixed at init
    sync: Atomic<(i64, i64)>,  // (tick, tod) at the last resync point
    stat: Atomic<(i64, i64)>,  // (adjust, tick) at the last call
}

impl SuppressedStrategy {
    pub fn new(
        name: &'static str,
        unit_per_sec: i64,
        resync_after: i64,
        resync_threshold: i64,
        source: Box<dyn TickSource>,
    ) -> Self {
        SuppressedStrategy {
            name,
            unit_per_sec,
            resync_after,
            resync_threshold,
            source,
            init: Atomic::new((0, 0)),
            sync: Atomic::new((0, 0)),
            stat: Atomic::new((0, 0)),
        }
    }

    /// A HRT-shaped strategy backed by the process's nanosecond monotonic clock.
    pub fn hrt() -> Self {
        SuppressedStrategy::new(
            "HRT",
            1_000_000_000,
            750_000_000,
            10_000_000,
            Box::new(InstantSource::new(1_000_000_000)),
        )
    }

    /// A MACH-shaped strategy: same algorithm, gated to macOS, naming the mach-specific counter
    /// the original reads directly (`mach_absolute_time`, which hosted Rust's `Instant` already
    /// wraps and rescales through `timebase_info` on this target).
    pub fn mach() -> Self {
        SuppressedStrategy::new(
            "MACH",
            1_000_000_000,
            750_000_000,
            10_000_000,
            Box::new(InstantSource::new(1_000_000_000)),
        )
    }

    /// A HPET-shaped strategy: same algorithm, gated to Linux hosts exposing `/dev/hpet`.
    pub fn hpet() -> Self {
        SuppressedStrategy::new(
            "HPET",
            1_000_000_000,
            750_000_000,
            10_000_000,
            Box::new(InstantSource::new(1_000_000_000)),
        )
    }

    /// A UPT ("uptime/times") strategy: millisecond granularity, 1%-of-elapsed suppression.
    pub fn upt() -> Self {
        SuppressedStrategy::new("UPT", 1_000, 750, 10, Box::new(InstantSource::new(1_000)))
    }
}

impl TtodStrategy for SuppressedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&self) -> bool {
        if !self.source.available() {
            return false;
        }
        let tick0 = self.source.ticks();
        let tod0 = now_in_unit(self.unit_per_sec);
        self.init.store((tick0, tod0), Ordering::Relaxed);
        self.sync.store((tick0, tod0), Ordering::Relaxed);
        self.stat.store((0, tick0), Ordering::Relaxed);
        true
    }

    fn sample(&self) -> TtodOutcome {
        let init = self.init.load(Ordering::Relaxed);
        let mut tick_now = self.source.ticks();
        let mut diff = tick_now.wrapping_sub(init.0);

        if diff < 0 {
            log::warn!("ttod/{}: monotonic counter moved backwards, demoting", self.name);
            return TtodOutcome::Permanent;
        }

        let sync = self.sync.load(Ordering::Relaxed);
        let stat = self.stat.load(Ordering::Relaxed);
        let (adjust, last_tick) = stat;
        diff += adjust;

        if tick_now - sync.0 > self.resync_after {
            let fresh_tick = self.source.ticks();
            let fresh_tod = now_in_unit(self.unit_per_sec);
            tick_now = fresh_tick;
            let diff_tick = fresh_tick.wrapping_sub(init.0);
            let mut new_diff = diff_tick + adjust;
            let diff_tod = fresh_tod.wrapping_sub(init.1);
            let diff_calc = new_diff - diff_tod;
            let mut new_adjust = adjust;
            let mut should_resync = false;

            if diff_calc.abs() > self.resync_threshold {
                let corr_pct = (fresh_tick - last_tick) / 100;
                if corr_pct >= diff_calc.abs() {
                    new_adjust -= diff_calc;
                    should_resync = true;
                } else if diff_calc < 0 {
                    new_adjust += corr_pct;
                } else {
                    new_adjust -= corr_pct;
                }
                new_diff = diff_tick + new_adjust;
            } else {
                should_resync = true;
            }

            if should_resync {
                let _ = self.sync.compare_exchange(
                    sync,
                    (fresh_tick, fresh_tod),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            diff = new_diff;
            let _ = self.stat.compare_exchange(
                stat,
                (new_adjust, tick_now),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        } else {
            let _ = self.stat.compare_exchange(
                stat,
                (adjust, tick_now),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }

        let micros = match self.unit_per_sec {
            1_000_000_000 => (init.1 + diff) / 1_000,
            1_000 => (init.1 + diff) * 1_000,
            hz => ((init.1 + diff) as i128 * 1_000_000 / i128::from(hz)) as i64,
        };
        TtodOutcome::Micros(micros.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering as StdOrdering};
    use std::sync::Arc;

    struct FakeSource {
        ticks: Arc<AtomicI64>,
        freq_hz: i64,
    }
    impl TickSource for FakeSource {
        fn ticks(&self) -> i64 {
            self.ticks.load(StdOrdering::Relaxed)
        }
        fn freq_hz(&self) -> i64 {
            self.freq_hz
        }
    }

    #[test]
    fn hrt_shaped_strategy_samples_monotonically() {
        let ticks = Arc::new(AtomicI64::new(0));
        let strategy = SuppressedStrategy::new(
            "TEST",
            1_000_000_000,
            750_000_000,
            10_000_000,
            Box::new(FakeSource {
                ticks: ticks.clone(),
                freq_hz: 1_000_000_000,
            }),
        );
        assert!(strategy.init());
        let mut last = 0u64;
        for step in 1..=5 {
            ticks.store(step * 100_000_000, StdOrdering::Relaxed);
            match strategy.sample() {
                TtodOutcome::Micros(v) => {
                    assert!(v >= last, "ttod went backwards: {v} < {last}");
                    last = v;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn backward_tick_demotes_permanently() {
        let ticks = Arc::new(AtomicI64::new(1_000_000_000));
        let strategy = SuppressedStrategy::new(
            "TEST",
            1_000_000_000,
            750_000_000,
            10_000_000,
            Box::new(FakeSource {
                ticks: ticks.clone(),
                freq_hz: 1_000_000_000,
            }),
        );
        assert!(strategy.init());
        ticks.store(0, StdOrdering::Relaxed);
        assert_eq!(strategy.sample(), TtodOutcome::Permanent);
    }
}
