//! A single hashed timer wheel: insert/cancel/bump/next-timeout, all O(1) amortized.

use crate::config::{WheelConfig, SHORT_TIME_MAX};
use crate::do_time::ElapsedTicks;
use slab::Slab;
use spinning_top::Spinlock;

type TimeoutFn = Box<dyn FnOnce() + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    count: u32,
    slot: u32,
    prev: Option<usize>,
    next: Option<usize>,
    on_timeout: Option<TimeoutFn>,
    on_cancel: Option<CancelFn>,
    /// Set once a `bump()` sweep has decided this timer is due and unlinked it from its slot,
    /// but before its `on_timeout` has actually run. A `cancel()` landing in this window still
    /// intercepts the callbacks directly instead of touching slot-list/`to_cnt` bookkeeping that
    /// `bump()` has already done.
    pending_fire: bool,
}

#[derive(Clone, Copy)]
struct SlotList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl SlotList {
    const EMPTY: SlotList = SlotList {
        head: None,
        tail: None,
    };
}

#[derive(Clone, Copy)]
struct MinHint {
    key: usize,
    min_to: u32,
}

struct Inner {
    arena: Slab<TimerEntry>,
    slots: Box<[SlotList]>,
    to_cur: u32,
    to_cnt: u32,
    min: Option<MinHint>,
}

impl Inner {
    fn link(&mut self, slot: u32, key: usize, count: u32) {
        let list = &mut self.slots[slot as usize];
        let (insert_at_head, before) = match list.head {
            None => (true, None),
            Some(head_key) => {
                if count <= self.arena[head_key].count {
                    (true, None)
                } else {
                    match list.tail {
                        Some(tail_key) if count >= self.arena[tail_key].count => {
                            (false, None)
                        }
                        _ => {
                            // Walk from head looking for the first entry whose count exceeds
                            // ours; insert before it. The slot lists are short in practice
                            // (bounded by how many timers share a (slot, count) pair).
                            let mut cursor = Some(head_key);
                            let mut before = None;
                            while let Some(k) = cursor {
                                if self.arena[k].count > count {
                                    before = Some(k);
                                    break;
                                }
                                cursor = self.arena[k].next;
                            }
                            (false, before)
                        }
                    }
                }
            }
        };

        if insert_at_head {
            let old_head = list.head;
            self.arena[key].next = old_head;
            self.arena[key].prev = None;
            if let Some(old_head) = old_head {
                self.arena[old_head].prev = Some(key);
            } else {
                list.tail = Some(key);
            }
            list.head = Some(key);
        } else if let Some(before_key) = before {
            let prev = self.arena[before_key].prev;
            self.arena[key].prev = prev;
            self.arena[key].next = Some(before_key);
            self.arena[before_key].prev = Some(key);
            match prev {
                Some(prev_key) => self.arena[prev_key].next = Some(key),
                None => list.head = Some(key),
            }
        } else {
            // append at tail
            let old_tail = list.tail;
            self.arena[key].prev = old_tail;
            self.arena[key].next = None;
            if let Some(old_tail) = old_tail {
                self.arena[old_tail].next = Some(key);
            } else {
                list.head = Some(key);
            }
            list.tail = Some(key);
        }
    }

    fn unlink(&mut self, key: usize) {
        let (slot, prev, next) = {
            let e = &self.arena[key];
            (e.slot, e.prev, e.next)
        };
        match prev {
            Some(prev_key) => self.arena[prev_key].next = next,
            None => self.slots[slot as usize].head = next,
        }
        match next {
            Some(next_key) => self.arena[next_key].prev = prev,
            None => self.slots[slot as usize].tail = prev,
        }
    }
}

/// A single hashed timer wheel with `N = config.size()` slots, guarded by one short-held lock.
pub struct Wheel {
    id: u32,
    size: u32,
    inner: Spinlock<Inner>,
}

impl Wheel {
    pub(crate) fn new(id: u32, config: WheelConfig) -> Self {
        let size = config.size();
        Wheel {
            id,
            size,
            inner: Spinlock::new(Inner {
                arena: Slab::new(),
                slots: vec![SlotList::EMPTY; size as usize].into_boxed_slice(),
                to_cur: 0,
                to_cnt: 0,
                min: None,
            }),
        }
    }

    /// This wheel's id within its [`crate::WheelSet`] ring.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of slots.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Inserts a new timer due in `ticks` wheel ticks, honoring the not-yet-applied `do_time`
    /// backlog. Returns the arena key the caller must hold onto (via a [`crate::TimerHandle`])
    /// to cancel or query the timer later.
    pub(crate) fn insert(
        &self,
        ticks_without_backlog: u32,
        do_time: &ElapsedTicks,
        on_timeout: TimeoutFn,
        on_cancel: Option<CancelFn>,
    ) -> usize {
        let backlog = do_time.read().max(0) as u32;
        // A zero-tick request is indistinguishable from a one-tick one: both are due on the
        // very next bump, which is the wheel's finest resolvable duration.
        let ticks = (ticks_without_backlog + backlog).max(1);

        let mut inner = self.inner.lock();
        let to_cur = inner.to_cur;
        let count = ticks / self.size;
        let slot = (to_cur + ticks) % self.size;

        let key = inner.arena.insert(TimerEntry {
            count,
            slot,
            prev: None,
            next: None,
            on_timeout: Some(on_timeout),
            on_cancel,
            pending_fire: false,
        });
        inner.link(slot, key, count);
        inner.to_cnt += 1;

        match inner.min {
            None => inner.min = Some(MinHint { key, min_to: ticks }),
            Some(hint) if ticks < hint.min_to => {
                inner.min = Some(MinHint { key, min_to: ticks })
            }
            Some(hint) if hint.key == key && ticks > hint.min_to => inner.min = None,
            _ => {}
        }
        if inner.to_cnt == 1 {
            inner.min = Some(MinHint { key, min_to: ticks });
        }

        drop(inner);

        if ticks <= SHORT_TIME_MAX {
            log::trace!(
                "wheel {}: timer {} scheduled within short-time range ({} ticks)",
                self.id,
                key,
                ticks
            );
        }

        key
    }

    /// Cancels the timer at `key`, idempotent: a stale/unknown key (already fired or cancelled)
    /// is a silent no-op. The `on_cancel` callback, if any, runs after the wheel lock is
    /// released.
    pub(crate) fn cancel(&self, key: usize) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.arena.get(key) else {
            return;
        };

        if entry.pending_fire {
            // Already swept into a bump's expiry batch but not yet invoked: the slot-list
            // unlink and `to_cnt` decrement already happened in `bump()`, so just take the
            // callbacks. `bump()`'s firing loop cleans up the arena slot afterwards.
            let on_cancel = inner.arena[key].on_cancel.take();
            inner.arena[key].on_timeout = None; // scrub: must never fire after this
            drop(inner);
            if let Some(on_cancel) = on_cancel {
                on_cancel();
            }
            return;
        }

        if let Some(hint) = inner.min {
            if hint.key == key {
                inner.min = None;
            }
        }
        inner.unlink(key);
        let mut entry = inner.arena.remove(key);
        inner.to_cnt -= 1;
        entry.on_timeout = None; // scrub: a cancelled timer must never fire
        drop(inner);

        if let Some(on_cancel) = entry.on_cancel.take() {
            on_cancel();
        }
    }

    /// Returns the remaining ticks until `key` fires, or `0` if `key` is unknown (inactive or
    /// overdue), per the "time left" snapshot formula.
    pub(crate) fn time_left_ticks(&self, key: usize) -> u32 {
        let inner = self.inner.lock();
        let Some(entry) = inner.arena.get(key) else {
            return 0;
        };
        if entry.pending_fire {
            return 0;
        }
        let to_cur = inner.to_cur;
        let base = if entry.slot < to_cur {
            (entry.count + 1) * self.size
        } else {
            entry.count * self.size
        };
        (base + entry.slot).saturating_sub(to_cur)
    }

    /// Advances this wheel by `dt` ticks, firing every timer whose count crosses the threshold
    /// along the way. Callbacks run after the wheel lock has been released.
    pub(crate) fn bump(&self, dt: u32) {
        if dt == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.to_cnt == 0 {
            inner.to_cur = (inner.to_cur + dt) % self.size;
            return;
        }

        let slots_to_visit = dt.min(self.size);
        let mut count_threshold = dt / self.size + 1;
        let final_pos = (inner.to_cur + dt) % self.size;

        // `to_cur` is the slot already processed by the previous bump; this sweep owns the
        // *next* `slots_to_visit` slots, i.e. the half-open range `(to_cur, to_cur + dt]`. So
        // `pos` advances before each slot is processed, and the destination slot (`final_pos`)
        // is always visited by the call that reaches it.
        let mut expired = Vec::new();
        let mut pos = inner.to_cur;
        for _ in 0..slots_to_visit {
            pos = (pos + 1) % self.size;

            let mut cursor = inner.slots[pos as usize].head;
            while let Some(key) = cursor {
                let next = inner.arena[key].next;
                if inner.arena[key].count < count_threshold {
                    if let Some(hint) = inner.min {
                        if hint.key == key {
                            inner.min = None;
                        }
                    }
                    inner.unlink(key);
                    inner.to_cnt -= 1;
                    let entry = &mut inner.arena[key];
                    entry.slot = 0;
                    entry.count = 0;
                    entry.pending_fire = true;
                    expired.push(key);
                } else {
                    break;
                }
                cursor = next;
            }
            // every remaining timer in this slot still owes `count_threshold` full
            // revolutions; walk the tail of the (now count-sorted) list and decrement in
            // place, stopping as soon as we see one that has already been paid down below
            // the threshold by a previous bump (cannot happen, invariant 3 guarantees sort
            // order, so this is a single linear pass over the remainder).
            let mut cursor = inner.slots[pos as usize].head;
            while let Some(key) = cursor {
                inner.arena[key].count -= count_threshold;
                cursor = inner.arena[key].next;
            }

            if pos == final_pos {
                count_threshold -= 1;
            }
        }

        inner.to_cur = final_pos;
        if let Some(hint) = &mut inner.min {
            hint.min_to = hint.min_to.saturating_sub(dt);
        }

        drop(inner);

        log::debug!(
            "wheel {}: bump({}) expired {} timer(s)",
            self.id,
            dt,
            expired.len()
        );

        // Callbacks run outside the wheel lock, in slot-list (FIFO) order. A timer still in
        // this batch can be cancelled by an earlier callback in the same loop: `cancel()`
        // notices `pending_fire` and clears `on_timeout` before we get here, so we simply skip
        // invoking it and reclaim the arena slot.
        for key in expired {
            let mut inner = self.inner.lock();
            let cb = inner.arena[key].on_timeout.take();
            inner.arena.remove(key);
            drop(inner);
            if let Some(cb) = cb {
                cb();
            }
        }
    }

    /// Ticks until the next timeout, clamped to [`SHORT_TIME_MAX`], or `None` if this wheel has
    /// no active timers.
    pub(crate) fn next_time(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        if inner.to_cnt == 0 {
            return None;
        }
        if let Some(hint) = inner.min {
            return Some(hint.min_to.min(SHORT_TIME_MAX));
        }

        // No cached minimum: scan forward from `to_cur`, visiting every resident timer exactly
        // once, tracking the smallest absolute tick distance.
        let to_cur = inner.to_cur;
        let mut visited = 0u32;
        let mut min: Option<(usize, u32)> = None;
        let mut offset = 0u32;
        let mut pos = to_cur;
        loop {
            let mut cursor = inner.slots[pos as usize].head;
            while let Some(key) = cursor {
                visited += 1;
                let depth = offset + inner.arena[key].count * self.size;
                if min.map_or(true, |(_, best)| depth < best) {
                    min = Some((key, depth));
                }
                cursor = inner.arena[key].next;
            }
            if visited >= inner.to_cnt {
                break;
            }
            offset += 1;
            pos = (pos + 1) % self.size;
            if pos == to_cur {
                break;
            }
        }

        if let Some((key, depth)) = min {
            inner.min = Some(MinHint {
                key,
                min_to: depth,
            });
            Some(depth.min(SHORT_TIME_MAX))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn tiny_wheel() -> Wheel {
        Wheel::new(0, WheelConfig { size: 4 })
    }

    #[test]
    fn wheel_wrap_scenario() {
        // spec seed suite #1: N=4, insert T with ticks=5 -> count=1, slot=1; fires on the 4th
        // bump (bump(1)*3 then bump(2)).
        let wheel = tiny_wheel();
        let do_time = ElapsedTicks::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = fired.clone();
        let key = wheel.insert(5, &do_time, Box::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }), None);
        assert_eq!(wheel.inner.lock().arena[key].count, 1);
        assert_eq!(wheel.inner.lock().arena[key].slot, 1);

        wheel.bump(1);
        wheel.bump(1);
        wheel.bump(1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        wheel.bump(2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bump_zero_is_noop() {
        let wheel = tiny_wheel();
        let do_time = ElapsedTicks::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = fired.clone();
        wheel.insert(1, &do_time, Box::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }), None);
        wheel.bump(0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bump_past_wheel_size_visits_every_slot_once() {
        let wheel = Wheel::new(0, WheelConfig { size: 4 });
        let do_time = ElapsedTicks::new();
        let fired = Arc::new(AtomicU32::new(0));
        for ticks in [0u32, 1, 2, 3] {
            let fired_cb = fired.clone();
            wheel.insert(ticks, &do_time, Box::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }), None);
        }
        wheel.bump(10); // dt >= N: every slot visited exactly once
        assert_eq!(fired.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cancel_is_idempotent() {
        let wheel = tiny_wheel();
        let do_time = ElapsedTicks::new();
        let key = wheel.insert(2, &do_time, Box::new(|| {}), None);
        wheel.cancel(key);
        wheel.cancel(key); // second cancel must not panic or double-run on_cancel
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let wheel = tiny_wheel();
        let do_time = ElapsedTicks::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = fired.clone();
        let key = wheel.insert(1, &do_time, Box::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }), None);
        wheel.cancel(key);
        wheel.bump(4);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn min_tracking_scenario() {
        // spec seed suite #2: N=8, insert at ticks 10, 3, 7 -> min_to == 3.
        let wheel = Wheel::new(0, WheelConfig { size: 8 });
        let do_time = ElapsedTicks::new();
        wheel.insert(10, &do_time, Box::new(|| {}), None);
        wheel.insert(3, &do_time, Box::new(|| {}), None);
        wheel.insert(7, &do_time, Box::new(|| {}), None);
        assert_eq!(wheel.next_time(), Some(3));
    }

    #[test]
    fn set_timeout_zero_fires_on_next_bump() {
        let wheel = tiny_wheel();
        let do_time = ElapsedTicks::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = fired.clone();
        wheel.insert(0, &do_time, Box::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }), None);
        wheel.bump(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
