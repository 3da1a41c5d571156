//! The TSC (invariant time-stamp counter) strategy.
//!
//! Grounded on `ttod_impl_tsc.h`: four calibration records (`init`, `last`, `freq`, `range`)
//! plus a reference-timer calibration pair, all accessed via 128-bit CAS so concurrent callers
//! can race the calibration without a lock. A lost CAS just means another thread calibrated
//! first; this strategy tolerates that by re-reading and retrying.

use atomic::{Atomic, Ordering};
use std::sync::atomic::{AtomicI64, AtomicU64};

use crate::strategy::{TtodOutcome, TtodStrategy};
use runtime_time_platform::features::{self, CpuFeatures};

/// Minimum reference-clock span, in reference ticks, required before a TSC frequency can be
/// computed (`TTOD_TSC_MIN_CALC_MICROS` in the original: one second's worth of reference ticks).
const MIN_CALC_SPAN_NUM: u64 = 1;
const MIN_CALC_SPAN_DEN: u64 = 1;

/// Resync interval, in microseconds of wall-clock time, once the TSC frequency is locked in.
const MICROS_PER_RESYNC: u64 = 750_000;

/// A source of monotonic ticks the TSC is calibrated against (Mach absolute time or `hrtime` in
/// the original; on hosted Rust, the process's monotonic reference clock). Exists as a trait so
/// tests can inject a clock that jumps backwards (spec's TSC-demotion scenario) without needing
/// real hardware to misbehave.
pub trait ReferenceClock: Send + Sync {
    /// Ticks elapsed since an arbitrary, fixed epoch. Must be monotonic in a healthy system;
    /// this strategy treats a backwards jump as a permanent failure.
    fn ticks(&self) -> u64;
    /// Ticks per second of this reference clock.
    fn freq_hz(&self) -> u64;
}

struct SystemReferenceClock;

impl ReferenceClock for SystemReferenceClock {
    fn ticks(&self) -> u64 {
        runtime_time_platform::tsc::reference_clock_nanos()
    }
    fn freq_hz(&self) -> u64 {
        1_000_000_000
    }
}

/// A source of raw TSC reads. A trait for the same testability reason as [`ReferenceClock`].
pub trait TscReader: Send + Sync {
    fn read(&self) -> u64;
}

struct SystemTscReader;

impl TscReader for SystemTscReader {
    fn read(&self) -> u64 {
        runtime_time_platform::tsc::volatile_rdtsc()
    }
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn mul_div_u64(a: u64, b: u64, c: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) / u128::from(c.max(1))) as u64
}

/// Clamps a raw wall-clock offset (microseconds) to the step table in spec.md §4.B:
///
/// | `|offset|` | step applied |
/// |---|---|
/// | > 1,000,000 µs | ±10,000 µs |
/// | > 10,000 µs | offset/100 |
/// | > 1,000 µs | offset/10 |
/// | ≤ 1,000 µs | offset |
pub fn bound_adjustment(offset: i64) -> i64 {
    let magnitude = offset.unsigned_abs();
    let bounded = if magnitude > 1_000_000 {
        10_000
    } else if magnitude > 10_000 {
        magnitude / 100
    } else if magnitude > 1_000 {
        magnitude / 10
    } else {
        magnitude
    };
    if offset < 0 {
        -(bounded as i64)
    } else {
        bounded as i64
    }
}

/// The TSC TTOD strategy.
pub struct TscStrategy {
    reference: Box<dyn ReferenceClock>,
    reader: Box<dyn TscReader>,
    required_features: CpuFeatures,

    init: Atomic<(u64, i64)>,      // (tsc, tod_us), fixed after init
    ref_init: Atomic<(u64, u64)>,  // (tsc, ref_ticks), fixed after init
    last: Atomic<(u64, i64)>,      // (tsc, tod_us)
    ref_last: Atomic<(u64, u64)>,  // (tsc, ref_ticks)
    freq: Atomic<(u64, u64)>,      // (ticks_per_microsecond, resync_ticks)
    range: Atomic<(u64, u64)>,     // (lo, hi) measured TSC frequency envelope
    wobble: AtomicU64,
    tsc_freq: AtomicU64,           // 0 until locked in
    adjust: AtomicI64,             // correction bias, microseconds
}

impl TscStrategy {
    /// Builds a TSC strategy against the real CPU TSC and the process's monotonic reference
    /// clock. This is the constructor production code should use.
    pub fn new() -> Self {
        TscStrategy::with_sources(Box::new(SystemReferenceClock), Box::new(SystemTscReader))
    }

    /// Builds a TSC strategy against injected clocks, for deterministic testing of calibration,
    /// wobble detection, and backward-jump demotion without depending on real hardware timing.
    pub fn with_sources(reference: Box<dyn ReferenceClock>, reader: Box<dyn TscReader>) -> Self {
        TscStrategy {
            reference,
            reader,
            required_features: CpuFeatures::X86_64 | CpuFeatures::RDTSCP | CpuFeatures::CMPXCHG16B,
            init: Atomic::new((0, 0)),
            ref_init: Atomic::new((0, 0)),
            last: Atomic::new((0, 0)),
            ref_last: Atomic::new((0, 0)),
            freq: Atomic::new((0, 0)),
            range: Atomic::new((0, 0)),
            wobble: AtomicU64::new(0),
            tsc_freq: AtomicU64::new(0),
            adjust: AtomicI64::new(0),
        }
    }

    fn calibrate(&self) -> TtodOutcome {
        let ref_last = self.ref_last.load(Ordering::Relaxed);
        let ref_now = self.reference.ticks();

        if ref_now < ref_last.1 {
            log::warn!("ttod/tsc: reference clock moved backwards, demoting permanently");
            return TtodOutcome::Permanent;
        }
        let tsc_now = self.reader.read();
        let _ = self.ref_last.compare_exchange(
            ref_last,
            (tsc_now, ref_now),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );

        let ref_init = self.ref_init.load(Ordering::Relaxed);
        let ref_span = ref_now.saturating_sub(ref_init.1);
        let min_span = mul_div_u64(self.reference.freq_hz(), MIN_CALC_SPAN_NUM, MIN_CALC_SPAN_DEN);
        if ref_span < min_span {
            return TtodOutcome::Transient;
        }

        let tsc_span = tsc_now.wrapping_sub(ref_init.0);
        let candidate = mul_div_u64(tsc_span, self.reference.freq_hz(), ref_span);

        loop {
            let range = self.range.load(Ordering::Relaxed);
            let new_lo = if range.0 == 0 || candidate < range.0 {
                candidate
            } else {
                range.0
            };
            let new_hi = candidate.max(range.1);
            let wobble = new_hi / 100; // initial tolerance: 1% of the highest measurement
            if self
                .range
                .compare_exchange(range, (new_lo, new_hi), Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            self.wobble.store(wobble, Ordering::Relaxed);

            if new_hi - new_lo > wobble {
                log::warn!(
                    "ttod/tsc: excessive frequency wobble ({} > {}), demoting permanently",
                    new_hi - new_lo,
                    wobble
                );
                return TtodOutcome::Permanent;
            }

            let locked = (new_lo + new_hi) / 2;
            let uticks = (locked / 1_000_000).max(1);
            let resync = uticks * MICROS_PER_RESYNC;
            self.freq.store((uticks, resync), Ordering::Relaxed);
            self.tsc_freq.store(locked, Ordering::Relaxed);

            let tod = now_micros();
            self.last.store((tsc_now, tod), Ordering::Release);
            return TtodOutcome::Micros(tod as u64);
        }
    }

    fn extrapolate_or_resync(&self) -> TtodOutcome {
        let last = self.last.load(Ordering::Acquire);
        let ticks = self.reader.read();
        let wobble = self.wobble.load(Ordering::Relaxed);

        if ticks.wrapping_add(wobble) < last.0 {
            log::warn!("ttod/tsc: TSC moved backwards beyond tolerance, demoting permanently");
            return TtodOutcome::Permanent;
        }

        let span = ticks.wrapping_sub(last.0);
        let (uticks, resync) = self.freq.load(Ordering::Relaxed);
        if span < resync {
            let adjust = self.adjust.load(Ordering::Relaxed);
            return TtodOutcome::Micros((last.1 + adjust + (span / uticks) as i64) as u64);
        }

        let curr_tod = now_micros();
        let curr = (ticks, curr_tod);
        if self
            .last
            .compare_exchange(last, curr, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let init = self.init.load(Ordering::Relaxed);
            let tod_diff = curr_tod - init.1;
            let tsc_diff = ticks.wrapping_sub(init.0);
            let tsc_freq = self.tsc_freq.load(Ordering::Relaxed);
            let tod_calc = mul_div_u64(tsc_diff, 1_000_000, tsc_freq) as i64;
            let old_adjust = self.adjust.load(Ordering::Relaxed);
            let offset = tod_diff - tod_calc + old_adjust;
            if offset != 0 {
                let new_adjust = bound_adjustment(offset) + old_adjust;
                self.adjust.store(new_adjust, Ordering::Relaxed);
                return TtodOutcome::Micros((curr_tod + new_adjust) as u64);
            }
            return TtodOutcome::Micros((curr_tod + old_adjust) as u64);
        }

        let adjust = self.adjust.load(Ordering::Relaxed);
        TtodOutcome::Micros((curr_tod + adjust) as u64)
    }
}

impl Default for TscStrategy {
    fn default() -> Self {
        TscStrategy::new()
    }
}

impl TtodStrategy for TscStrategy {
    fn name(&self) -> &'static str {
        "TSC"
    }

    fn init(&self) -> bool {
        let enabled = std::env::var("ERTS_ENABLE_TTOD_TSC")
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if !enabled {
            return false;
        }
        if !features::detect().contains(self.required_features) {
            return false;
        }

        let tsc0 = self.reader.read();
        let ref0 = self.reference.ticks();
        let tod0 = now_micros();
        self.init.store((tsc0, tod0), Ordering::Relaxed);
        self.ref_init.store((tsc0, ref0), Ordering::Relaxed);
        self.last.store((tsc0, tod0), Ordering::Relaxed);
        self.ref_last.store((tsc0, ref0), Ordering::Relaxed);
        true
    }

    fn sample(&self) -> TtodOutcome {
        if self.tsc_freq.load(Ordering::Relaxed) == 0 {
            return self.calibrate();
        }
        self.extrapolate_or_resync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::sync::Arc;

    struct FakeReference {
        ticks: Arc<StdAtomicU64>,
        freq: u64,
    }
    impl ReferenceClock for FakeReference {
        fn ticks(&self) -> u64 {
            self.ticks.load(std::sync::atomic::Ordering::Relaxed)
        }
        fn freq_hz(&self) -> u64 {
            self.freq
        }
    }

    struct FakeTsc {
        ticks: Arc<StdAtomicU64>,
    }
    impl TscReader for FakeTsc {
        fn read(&self) -> u64 {
            self.ticks.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    fn make(ref_hz: u64) -> (TscStrategy, Arc<StdAtomicU64>, Arc<StdAtomicU64>) {
        let ref_ticks = Arc::new(StdAtomicU64::new(0));
        let tsc_ticks = Arc::new(StdAtomicU64::new(0));
        let strategy = TscStrategy::with_sources(
            Box::new(FakeReference {
                ticks: ref_ticks.clone(),
                freq: ref_hz,
            }),
            Box::new(FakeTsc {
                ticks: tsc_ticks.clone(),
            }),
        );
        // bypass init()'s env/CPU-feature gate: tests exercise the calibration math directly.
        let tsc0 = tsc_ticks.load(std::sync::atomic::Ordering::Relaxed);
        let ref0 = ref_ticks.load(std::sync::atomic::Ordering::Relaxed);
        strategy.init.store((tsc0, 0), Ordering::Relaxed);
        strategy.ref_init.store((tsc0, ref0), Ordering::Relaxed);
        strategy.last.store((tsc0, 0), Ordering::Relaxed);
        strategy.ref_last.store((tsc0, ref0), Ordering::Relaxed);
        (strategy, ref_ticks, tsc_ticks)
    }

    #[test]
    fn transient_until_one_second_of_reference_elapses() {
        let (strategy, ref_ticks, tsc_ticks) = make(1_000_000_000);
        ref_ticks.store(500_000_000, std::sync::atomic::Ordering::Relaxed);
        tsc_ticks.store(1_500_000_000, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(strategy.sample(), TtodOutcome::Transient);
    }

    #[test]
    fn locks_in_frequency_once_elapsed_and_within_wobble() {
        let (strategy, ref_ticks, tsc_ticks) = make(1_000_000_000);
        // simulate a 3GHz TSC over 2 seconds of reference time, no wobble at all.
        ref_ticks.store(2_000_000_000, std::sync::atomic::Ordering::Relaxed);
        tsc_ticks.store(6_000_000_000, std::sync::atomic::Ordering::Relaxed);
        match strategy.sample() {
            TtodOutcome::Micros(_) => {}
            other => panic!("expected a calibrated sample, got {other:?}"),
        }
        assert_eq!(strategy.tsc_freq.load(Ordering::Relaxed), 3_000_000_000);
    }

    #[test]
    fn backward_reference_jump_demotes_permanently() {
        // spec seed suite #5: reference clock jumps backwards by 1us -> permanent failure
        // within one call; a subsequent dispatcher call would fall through to the successor.
        let (strategy, ref_ticks, tsc_ticks) = make(1_000_000_000);
        ref_ticks.store(2_000_000_000, std::sync::atomic::Ordering::Relaxed);
        tsc_ticks.store(6_000_000_000, std::sync::atomic::Ordering::Relaxed);
        assert!(matches!(strategy.sample(), TtodOutcome::Micros(_)));

        // one more sample to populate `ref_last` at the post-lock-in point, then jump back.
        ref_ticks.fetch_sub(1_000, std::sync::atomic::Ordering::Relaxed);
        // force re-calibration path by resetting tsc_freq, simulating a strategy that hasn't
        // locked in yet and observes the backwards jump during calibration.
        strategy.tsc_freq.store(0, Ordering::Relaxed);
        assert_eq!(strategy.sample(), TtodOutcome::Permanent);
    }

    #[test]
    fn bound_adjustment_matches_spec_table() {
        // spec seed suite #6
        assert_eq!(bound_adjustment(2_000_000), 10_000);
        assert_eq!(bound_adjustment(500_000), 5_000);
        assert_eq!(bound_adjustment(5_000), 500);
        assert_eq!(bound_adjustment(500), 500);
        assert_eq!(bound_adjustment(-2_000_000), -10_000);
    }
}
