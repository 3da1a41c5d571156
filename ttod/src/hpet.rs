//! HPET: gated on the presence of `/dev/hpet`, Linux only.
//!
//! The original programs the HPET's memory-mapped registers directly; doing the same from safe
//! hosted Rust without a dedicated hardware-access crate is out of scope (see DESIGN.md), so this
//! strategy uses the same monotonic-counter algorithm as [`crate::hrt`], gated on the device
//! actually being present, which is as far as a hosted rewrite can honor "prefer the HPET when
//! available" without adding raw MMIO.

use crate::strategy::{TtodOutcome, TtodStrategy};
use crate::suppressed::SuppressedStrategy;

pub struct HpetStrategy {
    inner: SuppressedStrategy,
}

impl HpetStrategy {
    pub fn new() -> Self {
        HpetStrategy {
            inner: SuppressedStrategy::hpet(),
        }
    }

    fn device_present(&self) -> bool {
        cfg!(target_os = "linux") && std::path::Path::new("/dev/hpet").exists()
    }
}

impl Default for HpetStrategy {
    fn default() -> Self {
        HpetStrategy::new()
    }
}

impl TtodStrategy for HpetStrategy {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn init(&self) -> bool {
        if !self.device_present() {
            return false;
        }
        self.inner.init()
    }

    fn sample(&self) -> TtodOutcome {
        self.inner.sample()
    }
}
