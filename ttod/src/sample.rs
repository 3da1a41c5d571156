//! A fully mockable strategy used only by tests and doctests, never wired into
//! [`crate::Dispatcher::with_default_strategies`].
//!
//! Grounded on `ttod_impl_sample.h`, the template the original ships for writing a new strategy;
//! here it is filled in as a strategy whose every call is programmable, so tests can script an
//! exact sequence of transient/permanent/successful outcomes.

use std::sync::Mutex;

use crate::strategy::{TtodOutcome, TtodStrategy};

/// A strategy driven entirely by a caller-supplied queue of outcomes.
pub struct StubStrategy {
    name: &'static str,
    outcomes: Mutex<std::collections::VecDeque<TtodOutcome>>,
    init_result: bool,
}

impl StubStrategy {
    pub fn new(name: &'static str, init_result: bool, outcomes: Vec<TtodOutcome>) -> Self {
        StubStrategy {
            name,
            outcomes: Mutex::new(outcomes.into()),
            init_result,
        }
    }
}

impl TtodStrategy for StubStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&self) -> bool {
        self.init_result
    }

    fn sample(&self) -> TtodOutcome {
        let mut queue = self.outcomes.lock().unwrap();
        queue.pop_front().unwrap_or(TtodOutcome::Permanent)
    }
}
