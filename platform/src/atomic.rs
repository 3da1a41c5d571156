//! Word-sized atomics in 32-, 64- and 128-bit widths, plus cache-line padding.
//!
//! 128-bit CAS is backed by the `atomic` crate, which transparently falls back to a striped
//! spinlock on targets without `CMPXCHG16B` — this is the "fine-grained mutex protecting the
//! 128-bit record" fallback, so there is no separate hand-rolled path to maintain here.

pub use atomic::Atomic;
pub use atomic::Ordering;
pub use crossbeam_utils::CachePadded;

/// A 64-bit value accessed atomically, relaxed ordering by default.
pub type Atomic64<T> = Atomic<T>;

/// A 128-bit value accessed atomically (CAS-only on most targets).
pub type Atomic128<T> = Atomic<T>;

/// Loads `a` with relaxed ordering.
pub fn load_relaxed<T: Copy>(a: &Atomic<T>) -> T {
    a.load(Ordering::Relaxed)
}

/// Stores `v` into `a` with release ordering, matching `do_time_add`'s contract.
pub fn store_release<T: Copy>(a: &Atomic<T>, v: T) {
    a.store(v, Ordering::Release)
}

/// Loads `a` with acquire ordering, matching `do_time_read`'s contract.
pub fn load_acquire<T: Copy>(a: &Atomic<T>) -> T {
    a.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_pair_round_trips() {
        let a: Atomic<(u64, u64)> = Atomic::new((1, 2));
        let got = a.compare_exchange(
            (1, 2),
            (3, 4),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        assert_eq!(got, Ok((1, 2)));
        assert_eq!(load_relaxed(&a), (3, 4));
    }
}
