//! The TTOD dispatcher: an ordered chain of strategies, with CAS-based permanent-failure
//! demotion and an always-last `gettimeofday` fallback.
//!
//! Grounded on `erl_time_sup.c`'s `init_tolerant_timeofday`/`get_tolerant_timeofday`: the active
//! range of the strategy chain is addressed by a `(head, tail)` pair of indices into a fixed
//! array, packed into one atomic word so the pair updates atomically (the "128-bit atomic pair
//! (current_fn, current_name)" spec.md §4.B describes, expressed here as a packed `(head, tail)`
//! rather than a function pointer, since the chain can only ever shrink from either end). A
//! strategy's permanent failure CAS-advances `head` past it (if it was the first live strategy)
//! or CAS-retreats `tail` before it (if it was the last); once `head >= tail`, the dispatcher is
//! disabled for good and every call falls through to `gettimeofday`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::hpet::HpetStrategy;
use crate::hrt::HrtStrategy;
use crate::mach::MachStrategy;
use crate::strategy::{TtodOutcome, TtodStrategy};
use crate::tsc::TscStrategy;
use crate::upt::UptStrategy;

fn pack(head: u32, tail: u32) -> u64 {
    (u64::from(head) << 32) | u64::from(tail)
}

fn unpack(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

fn gettimeofday_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// An ordered, self-demoting chain of TTOD strategies.
pub struct Dispatcher {
    strategies: Vec<Box<dyn TtodStrategy>>,
    head_tail: AtomicU64,
    disable: AtomicBool,
}

impl Dispatcher {
    /// Builds an empty dispatcher: every call falls straight through to `gettimeofday`. Useful
    /// as a base for [`Dispatcher::push`] in tests.
    pub fn empty() -> Self {
        Dispatcher {
            strategies: Vec::new(),
            head_tail: AtomicU64::new(pack(0, 0)),
            disable: AtomicBool::new(false),
        }
    }

    /// Attempts to initialize and append `strategy` to the chain. A strategy whose `init()`
    /// returns `false` is dropped rather than occupying a dead slot (a deliberate cleanup of the
    /// original's release-build behavior, which unconditionally advanced `tail` even past a
    /// failed init — see DESIGN.md).
    pub fn push(&mut self, strategy: Box<dyn TtodStrategy>) {
        if strategy.init() {
            log::debug!("ttod: '{}' initialized", strategy.name());
            self.strategies.push(strategy);
            let (head, _) = unpack(self.head_tail.load(Ordering::Relaxed));
            self.head_tail
                .store(pack(head, self.strategies.len() as u32), Ordering::Relaxed);
        } else {
            log::trace!("ttod: '{}' declined to initialize", strategy.name());
        }
    }

    /// Builds the dispatcher with every strategy this crate ships, in the fixed order
    /// `erl_time_sup.c` initializes them: TSC, MACH, HPET, HRT, UPT, then the implicit
    /// `gettimeofday` fallback. Each strategy gates its own availability (CPU features,
    /// environment variable, target platform); only those that succeed occupy a chain slot.
    pub fn with_default_strategies() -> Self {
        let mut dispatcher = Dispatcher::empty();
        dispatcher.push(Box::new(TscStrategy::new()));
        dispatcher.push(Box::new(MachStrategy::new()));
        dispatcher.push(Box::new(HpetStrategy::new()));
        dispatcher.push(Box::new(HrtStrategy::new()));
        dispatcher.push(Box::new(UptStrategy::new()));
        dispatcher
    }

    /// Forces every subsequent call to fall through to `gettimeofday`, regardless of chain state.
    pub fn disable(&self) {
        self.disable.store(true, Ordering::Relaxed);
    }

    /// Name of the strategy that would currently be tried first, or `None` if the chain is
    /// empty/disabled (calls fall straight through to `gettimeofday`).
    pub fn active_strategy_name(&self) -> Option<&'static str> {
        if self.disable.load(Ordering::Relaxed) {
            return None;
        }
        let (head, tail) = unpack(self.head_tail.load(Ordering::Relaxed));
        if head < tail {
            Some(self.strategies[head as usize].name())
        } else {
            None
        }
    }

    /// Samples the current wall-clock time in microseconds since the Unix epoch, walking the
    /// live strategy chain and falling through permanent/transient failures, demoting
    /// permanently-failed strategies out of the chain as it goes.
    pub fn sample_micros(&self) -> u64 {
        if !self.disable.load(Ordering::Relaxed) {
            let mut packed = self.head_tail.load(Ordering::Acquire);
            loop {
                let (head, tail) = unpack(packed);
                let mut index = head;
                let mut advanced = false;
                while index < tail {
                    match self.strategies[index as usize].sample() {
                        TtodOutcome::Micros(v) => return v,
                        TtodOutcome::Transient => {
                            index += 1;
                        }
                        TtodOutcome::Permanent => {
                            log::warn!(
                                "ttod: '{}' permanently failed, demoting",
                                self.strategies[index as usize].name()
                            );
                            if index == head {
                                let new_packed = pack(index + 1, tail);
                                if self
                                    .head_tail
                                    .compare_exchange(
                                        packed,
                                        new_packed,
                                        Ordering::AcqRel,
                                        Ordering::Relaxed,
                                    )
                                    .is_ok()
                                {
                                    packed = new_packed;
                                    advanced = true;
                                }
                            } else if index + 1 == tail {
                                let new_packed = pack(head, index);
                                if self
                                    .head_tail
                                    .compare_exchange(
                                        packed,
                                        new_packed,
                                        Ordering::AcqRel,
                                        Ordering::Relaxed,
                                    )
                                    .is_ok()
                                {
                                    packed = new_packed;
                                    advanced = true;
                                }
                            }
                            index += 1;
                        }
                    }
                }
                let _ = advanced;
                let (head, tail) = unpack(packed);
                if head >= tail {
                    self.disable.store(true, Ordering::Relaxed);
                }
                break;
            }
        }
        gettimeofday_micros()
    }
}
