// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The expiry-ordered delay queue (spec.md §4.3).
//!
//! Built on top of a [`TcbPool`]: the pool supplies slots, this module
//! threads occupied slots into a doubly linked list ordered ascending by
//! expiry under wrap-aware comparison (spec.md §3, Invariant 2). Per the
//! dependency order in spec.md §2 ("TCB pool → ... → delay queue"), a
//! `DelayQueue` owns its `TcbPool` rather than borrowing one, so the two
//! components can never disagree about slot capacity.

use crate::task::Task;
use crate::tcb::{Origin, Tcb, TcbIndex};
use crate::tcb_pool::TcbPool;
use crate::time::Tick;

/// Expiry-ordered, doubly linked queue of TCBs, backed by a fixed-capacity
/// arena of `N` slots.
pub struct DelayQueue<const N: usize> {
    pool: TcbPool<N>,
    head: Option<TcbIndex>,
    tail: Option<TcbIndex>,
    len: usize,
}

impl<const N: usize> DelayQueue<N> {
    pub const fn new() -> Self {
        DelayQueue {
            pool: TcbPool::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn free_len(&self) -> usize {
        self.pool.free_len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocates a TCB from the pool and inserts it at the unique position
    /// that keeps the queue ascending by `expiry` under wrap-aware
    /// comparison. Ties place the new entry after existing entries with the
    /// same expiry, preserving FIFO among equally-timed messages (spec.md
    /// §4.3) — this is what makes `UTASK_IMMEDIATE` storms deliver in
    /// posting order.
    ///
    /// O(n) over the currently queued entries (spec.md §4.3).
    pub fn enqueue(
        &mut self,
        task: Task,
        id: u32,
        payload: Option<core::ptr::NonNull<u8>>,
        expiry: Tick,
        origin: Origin,
    ) -> Option<TcbIndex> {
        let tcb = Tcb {
            task,
            id,
            payload,
            expiry,
            origin,
            next: None,
            prev: None,
        };
        let idx = self.pool.alloc(tcb)?;
        self.insert_sorted(idx);
        Some(idx)
    }

    fn insert_sorted(&mut self, idx: TcbIndex) {
        let expiry = self.pool.get(idx).expiry;

        // Walk from the head looking for the first entry whose expiry is
        // strictly after `expiry`; insert just before it. Ties (`has_passed`
        // is non-strict) are walked past, so a new entry lands after any
        // existing entries with the same expiry. An empty scan (walked off
        // the tail) means `idx` becomes the new tail.
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let c_expiry = self.pool.get(c).expiry;
            if !expiry.has_passed(c_expiry) {
                break;
            }
            cursor = self.pool.get(c).next;
        }

        match cursor {
            None => {
                // Insert at tail (queue empty, or idx is >= everything).
                let old_tail = self.tail;
                self.pool.get_mut(idx).prev = old_tail;
                self.pool.get_mut(idx).next = None;
                if let Some(t) = old_tail {
                    self.pool.get_mut(t).next = Some(idx);
                } else {
                    self.head = Some(idx);
                }
                self.tail = Some(idx);
            }
            Some(before) => {
                let prev = self.pool.get(before).prev;
                self.pool.get_mut(idx).prev = prev;
                self.pool.get_mut(idx).next = Some(before);
                self.pool.get_mut(before).prev = Some(idx);
                match prev {
                    Some(p) => self.pool.get_mut(p).next = Some(idx),
                    None => self.head = Some(idx),
                }
            }
        }
        self.len += 1;
    }

    fn unlink(&mut self, idx: TcbIndex) {
        let (prev, next) = {
            let tcb = self.pool.get(idx);
            (tcb.prev, tcb.next)
        };
        match prev {
            Some(p) => self.pool.get_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.pool.get_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Returns the head of the queue without removing it.
    pub fn front(&self) -> Option<&Tcb> {
        self.head.map(|idx| self.pool.get(idx))
    }

    /// Removes and returns the head of the queue, freeing its TCB back to
    /// the pool's free list.
    pub fn dequeue(&mut self) -> Option<Tcb> {
        let idx = self.head?;
        let tcb = *self.pool.get(idx);
        self.unlink(idx);
        self.pool.free(idx);
        Some(tcb)
    }

    /// Removes every TCB whose `(task, id)` pair matches, returning the
    /// payload pointers of the removed entries (up to `OUT`) and the total
    /// count removed.
    ///
    /// Per SPEC_FULL.md §12, cancellation does not silently leak payloads:
    /// the kernel took ownership at post time, and the caller gets the
    /// payload pointers back here for disposal. If more than `OUT` entries
    /// match, the remainder are still removed and counted but their
    /// payloads are not returned — callers sizing `OUT` to their own
    /// maximum outstanding sends per `(task, id)` will never hit this.
    ///
    /// Must not be called from ISR context (spec.md §4.3).
    pub fn cancel<const OUT: usize>(
        &mut self,
        task: Task,
        id: u32,
    ) -> ([Option<core::ptr::NonNull<u8>>; OUT], usize) {
        let mut payloads = [None; OUT];
        let mut removed = 0usize;

        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let tcb = *self.pool.get(idx);
            cursor = tcb.next;
            if tcb.task == task && tcb.id == id {
                self.unlink(idx);
                if removed < OUT {
                    payloads[removed] = tcb.payload;
                }
                removed += 1;
                self.pool.free(idx);
            }
        }
        (payloads, removed)
    }
}

impl<const N: usize> Default for DelayQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(_t: &Task, _id: u32, _p: *mut u8) {}

    fn push(q: &mut DelayQueue<8>, task: Task, id: u32, expiry: u32) -> TcbIndex {
        q.enqueue(task, id, None, Tick::from_raw(expiry), Origin::App)
            .unwrap()
    }

    #[test]
    fn sorted_ascending_by_expiry() {
        let t = Task::new("t", handler);
        let mut q: DelayQueue<8> = DelayQueue::new();
        push(&mut q, t, 3, 300);
        push(&mut q, t, 1, 100);
        push(&mut q, t, 2, 200);

        assert_eq!(q.dequeue().unwrap().id(), 1);
        assert_eq!(q.dequeue().unwrap().id(), 2);
        assert_eq!(q.dequeue().unwrap().id(), 3);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn equal_expiry_is_fifo() {
        let t = Task::new("t", handler);
        let mut q: DelayQueue<8> = DelayQueue::new();
        push(&mut q, t, 1, 0);
        push(&mut q, t, 2, 0);
        push(&mut q, t, 3, 0);

        assert_eq!(q.dequeue().unwrap().id(), 1);
        assert_eq!(q.dequeue().unwrap().id(), 2);
        assert_eq!(q.dequeue().unwrap().id(), 3);
    }

    #[test]
    fn cancel_removes_matching_and_is_idempotent() {
        let t = Task::new("t", handler);
        let mut q: DelayQueue<8> = DelayQueue::new();
        push(&mut q, t, 1, 100);
        push(&mut q, t, 2, 200);
        push(&mut q, t, 3, 300);

        let (_payloads, count) = q.cancel::<4>(t, 2);
        assert_eq!(count, 1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dequeue().unwrap().id(), 1);
        assert_eq!(q.dequeue().unwrap().id(), 3);

        // Cancelling something no longer present returns 0 and mutates
        // nothing (spec.md §8, Cancel-idempotence).
        let (_payloads, count) = q.cancel::<4>(t, 2);
        assert_eq!(count, 0);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn cancel_frees_tcbs_back_to_pool() {
        let t = Task::new("t", handler);
        let mut q: DelayQueue<2> = DelayQueue::new();
        push(&mut q, t, 1, 100);
        push(&mut q, t, 2, 200);
        assert_eq!(q.free_len(), 0);

        q.cancel::<4>(t, 1);
        assert_eq!(q.free_len(), 1);
    }

    #[test]
    fn wrap_aware_ordering() {
        let t = Task::new("t", handler);
        let mut q: DelayQueue<8> = DelayQueue::new();
        // Entries near the top of the tick range sort before entries that
        // have wrapped past it.
        push(&mut q, t, 1, u32::MAX - 1);
        push(&mut q, t, 2, 2); // wrapped, "later" in real time

        assert_eq!(q.dequeue().unwrap().id(), 1);
        assert_eq!(q.dequeue().unwrap().id(), 2);
    }
}
