//! UPT ("uptime/times"): millisecond-granularity strategy with correction suppressed to at most
//! 1% of elapsed ticks per resync.
//!
//! Grounded on `ttod_impl_upt.h`. Note the original compiles this strategy out entirely
//! (`#if ... && 0 /* disabled for now */`); this rewrite keeps it live, per spec.md §2's
//! component table listing UPT as one of the five TTOD implementations to build — see
//! DESIGN.md.

use crate::strategy::{TtodOutcome, TtodStrategy};
use crate::suppressed::SuppressedStrategy;

pub struct UptStrategy {
    inner: SuppressedStrategy,
}

impl UptStrategy {
    pub fn new() -> Self {
        UptStrategy {
            inner: SuppressedStrategy::upt(),
        }
    }
}

impl Default for UptStrategy {
    fn default() -> Self {
        UptStrategy::new()
    }
}

impl TtodStrategy for UptStrategy {
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
