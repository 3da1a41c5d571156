//! HRT: a high-resolution monotonic timer strategy, available on every hosted target.
//!
//! Grounded on `ttod_impl_hrt.h`; the algorithm itself lives in [`crate::suppressed`].

use crate::strategy::{TtodOutcome, TtodStrategy};
use crate::suppressed::SuppressedStrategy;

pub struct HrtStrategy {
    inner: SuppressedStrategy,
}

impl HrtStrategy {
    pub fn new() -> Self {
        HrtStrategy {
            inner: SuppressedStrategy::hrt(),
        }
    }
}

impl Default for HrtStrategy {
    fn default() -> Self {
        HrtStrategy::new()
    }
}

impl TtodStrategy for HrtStrategy {
    fn name(&self) -> &'static str {
        self.inner.name()
    }
    fn init(&self) -> bool {
        self.inner.init()
    }
    fn sample(&self) -> TtodOutcome {
        self.inner.sample()
    }
}
