//! Raw TSC access and the monotonic reference clock TTOD strategies calibrate against.
//!
//! All `unsafe` in the crate lives here and in [`features`](crate::features); everything above
//! this module is safe Rust.

use std::sync::OnceLock;
use std::time::Instant;

/// Reads the TSC, issuing `lfence` first so the CPU cannot reorder the read ahead of preceding
/// instructions. Mirrors `volatile_rdtsc` in the kernel's APIC/TSC sync code.
#[cfg(target_arch = "x86_64")]
pub fn volatile_rdtsc() -> u64 {
    // SAFETY: `_mm_lfence`/`_rdtsc` are always available on x86_64; this is a pure read with no
    // aliasing concerns.
    unsafe {
        core::arch::x86_64::_mm_lfence();
        core::arch::x86_64::_rdtsc()
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn volatile_rdtsc() -> u64 {
    0
}

/// Reads the TSC using the serializing `rdtscp` instruction. Only call this when
/// [`CpuFeatures::RDTSCP`](crate::features::CpuFeatures::RDTSCP) is set.
#[cfg(target_arch = "x86_64")]
pub fn rdtscp() -> u64 {
    let mut aux: u32 = 0;
    // SAFETY: caller has checked RDTSCP support; `aux` is a valid out-param.
    unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn rdtscp() -> u64 {
    0
}

/// Reads the IA32_TSC_ADJUST MSR (0x3b). Only call this when the CPU is known to support it.
#[cfg(target_arch = "x86_64")]
pub fn read_tsc_adjust() -> u64 {
    const TSC_ADJUST_REGISTER: x86_64::registers::model_specific::Msr =
        x86_64::registers::model_specific::Msr::new(0x3b);
    // SAFETY: reading an MSR has no memory-safety implications; caller has established the
    // MSR is supported.
    unsafe { TSC_ADJUST_REGISTER.read() }
}

/// Writes the IA32_TSC_ADJUST MSR (0x3b).
#[cfg(target_arch = "x86_64")]
pub fn write_tsc_adjust(value: u64) {
    const TSC_ADJUST_REGISTER: x86_64::registers::model_specific::Msr =
        x86_64::registers::model_specific::Msr::new(0x3b);
    // SAFETY: writing this MSR only affects this core's view of its own TSC.
    unsafe { TSC_ADJUST_REGISTER.write(value) }
}

static REFERENCE_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed on the monotonic reference clock since the first call to this function
/// in the process. This is the "Mach or hrtime at >= 1ns granularity" reference timer the TSC
/// and other TTOD strategies calibrate against; on hosted Rust `Instant` already wraps whichever
/// of those the platform provides.
pub fn reference_clock_nanos() -> u64 {
    let epoch = REFERENCE_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_clock_is_monotonic() {
        let a = reference_clock_nanos();
        let b = reference_clock_nanos();
        assert!(b >= a);
    }
}
