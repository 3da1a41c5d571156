//! CPU feature detection.
//!
//! TTOD strategies gate their own availability on the flags produced here; detection itself
//! must never fail — an unsupported feature simply leaves its bit unset.

use std::sync::Once;

bitflags::bitflags! {
    /// Bit set describing the capabilities of the CPU the process is running on.
    pub struct CpuFeatures: u32 {
        /// Running in 32-bit x86 mode.
        const X86             = 1 << 0;
        /// Running in 64-bit x86 mode.
        const X86_64          = 1 << 1;
        /// PowerPC.
        const PPC             = 1 << 2;
        /// SPARC.
        const SPARC           = 1 << 3;
        /// Vendor string reported `GenuineIntel`.
        const INTEL           = 1 << 4;
        /// Vendor string reported `AuthenticAMD`.
        const AMD             = 1 << 5;
        /// Vendor could not be determined.
        const UNKNOWN_VENDOR  = 1 << 6;
        /// CPU is executing in long mode (64-bit).
        const LONG_MODE       = 1 << 7;
        /// `CMPXCHG16B` is available: 128-bit values can be CAS'd natively.
        const CMPXCHG16B      = 1 << 8;
        /// TSC is invariant (constant rate, unaffected by P-state/C-state changes).
        const INVARIANT_TSC   = 1 << 9;
        /// `RDTSCP` is available (serializing TSC read).
        const RDTSCP          = 1 << 10;
        /// AES-NI instruction set.
        const AES_NI          = 1 << 11;
    }
}

static DETECT_ONCE: Once = Once::new();
static mut DETECTED: CpuFeatures = CpuFeatures::empty();

/// Detects and returns the CPU features of the current process, running detection exactly once.
///
/// Safe to call from any thread, any number of times; the underlying `cpuid` probing only runs
/// on the first call.
pub fn detect() -> CpuFeatures {
    DETECT_ONCE.call_once(|| {
        let detected = detect_uncached();
        log::trace!("cpu feature detection: {:?}", detected);
        // SAFETY: only written once, behind `Once`, before any other thread can observe it.
        unsafe {
            DETECTED = detected;
        }
    });
    // SAFETY: `DETECT_ONCE` guarantees the write above happens-before this read.
    unsafe { DETECTED }
}

#[cfg(target_arch = "x86_64")]
fn detect_uncached() -> CpuFeatures {
    let mut flags = CpuFeatures::X86_64 | CpuFeatures::LONG_MODE;

    // SAFETY: `__cpuid` is always available on x86_64; leaf 0 and leaf 1 are architecturally
    // guaranteed to exist.
    let vendor = unsafe { core::arch::x86_64::__cpuid(0) };
    let vendor_bytes = [vendor.ebx, vendor.edx, vendor.ecx];
    flags |= match &vendor_bytes {
        [0x756e_6547, 0x4965_6e69, 0x6c65_746e] => CpuFeatures::INTEL,
        [0x6874_7541, 0x6974_6e65, 0x444d_4163] => CpuFeatures::AMD,
        _ => CpuFeatures::UNKNOWN_VENDOR,
    };

    // SAFETY: leaf 1 is always available.
    let leaf1 = unsafe { core::arch::x86_64::__cpuid(1) };
    if leaf1.ecx & (1 << 13) != 0 {
        flags |= CpuFeatures::CMPXCHG16B;
    }
    if leaf1.ecx & (1 << 25) != 0 {
        flags |= CpuFeatures::AES_NI;
    }

    // SAFETY: querying the highest extended leaf is always safe.
    let max_extended = unsafe { core::arch::x86_64::__cpuid(0x8000_0000) }.eax;
    if max_extended >= 0x8000_0001 {
        let ext1 = unsafe { core::arch::x86_64::__cpuid(0x8000_0001) };
        if ext1.edx & (1 << 27) != 0 {
            flags |= CpuFeatures::RDTSCP;
        }
    }
    if max_extended >= 0x8000_0007 {
        let ext7 = unsafe { core::arch::x86_64::__cpuid(0x8000_0007) };
        if ext7.edx & (1 << 8) != 0 {
            flags |= CpuFeatures::INVARIANT_TSC;
        }
    }

    flags
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_uncached() -> CpuFeatures {
    // No feature probing on architectures we don't have intrinsics for; every TTOD strategy
    // that depends on a flag here simply fails to init, falling through to the default strategy.
    CpuFeatures::empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_is_idempotent() {
        let a = detect();
        let b = detect();
        assert_eq!(a, b);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn x86_64_always_reports_long_mode() {
        assert!(detect().contains(CpuFeatures::X86_64 | CpuFeatures::LONG_MODE));
    }
}
