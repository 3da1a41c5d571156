//! MACH: wraps `mach_absolute_time` (via `std::time::Instant`, which already applies the
//! `mach_timebase_info` rational factor on this target) — macOS only.
//!
//! Grounded on `ttod_impl_mach.h`; the algorithm itself lives in [`crate::suppressed`].

use crate::strategy::{TtodOutcome, TtodStrategy};
use crate::suppressed::SuppressedStrategy;

pub struct MachStrategy {
    inner: SuppressedStrategy,
}

impl MachStrategy {
    pub fn new() -> Self {
        MachStrategy {
            inner: SuppressedStrategy::mach(),
        }
    }
}

impl Default for MachStrategy {
    fn default() -> Self {
        MachStrategy::new()
    }
}

impl TtodStrategy for MachStrategy {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn init(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        self.inner.init()
    }

    fn sample(&self) -> TtodOutcome {
        self.inner.sample()
    }
}
