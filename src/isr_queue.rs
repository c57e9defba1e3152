// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bounded ISR staging queue (spec.md §4.4).
//!
//! A ring buffer with one reserved slot, following spec.md's
//! "`UTASK_ISR_QUEUE_SIZE + 1` (one slot reserved)" capacity note, so that
//! `head == tail` unambiguously means empty. Grounded on `lib/circq`'s
//! head/tail/available circular buffer, simplified from byte-oriented to
//! fixed-record-oriented since every staged entry here is a
//! [`StagedMessage`], not a variable-length byte run.
//!
//! `CAP` is the queue's raw slot count, i.e. `ISR_QUEUE_SIZE + 1` — callers
//! construct `IsrQueue::<{ISR_QUEUE_SIZE + 1}>::new()` so the usable
//! capacity matches the configured `ISR_QUEUE_SIZE` (spec.md §6).
//!
//! The producer (an ISR, under the caller's own interrupt-disabled context)
//! writes at `tail` and advances it; the consumer (the dispatch loop) reads
//! from `head` and advances it. Per spec.md §5, the main loop reads
//! `head`/`tail` without a critical section, tolerating a momentarily stale
//! `tail` — this is a single-producer/single-consumer design and neither
//! side needs atomics beyond plain loads/stores of `usize`, since a torn
//! read of the index only delays visibility of a completed enqueue by one
//! loop iteration, never corrupts the buffer.

use crate::task::Task;
use crate::time::Tick;

/// A lightweight snapshot posted by an ISR, later promoted into a full TCB
/// by the dispatch loop (spec.md §4.4, "Promotion").
///
/// ISR-posted messages carry `expiry = current_tick`, i.e. they fire on the
/// next loop iteration after promotion (spec.md §4.4).
#[derive(Copy, Clone)]
pub struct StagedMessage {
    pub task: Task,
    pub id: u32,
    pub payload: Option<core::ptr::NonNull<u8>>,
    pub posted_at: Tick,
}

/// Error returned when [`IsrQueue::push`] finds the ring full.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueFull;

/// A single-producer/single-consumer ring with `CAP` raw slots (usable
/// capacity `CAP - 1`, per spec.md §3's "capacity N+1 (one slot reserved)").
pub struct IsrQueue<const CAP: usize> {
    slots: [Option<StagedMessage>; CAP],
    head: usize,
    tail: usize,
}

impl<const CAP: usize> IsrQueue<CAP> {
    pub const fn new() -> Self {
        assert!(CAP >= 2, "IsrQueue needs at least 2 raw slots (1 usable)");
        IsrQueue {
            slots: [None; CAP],
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.tail + 1) % CAP == self.head
    }

    /// Current occupancy; never exceeds `CAP - 1` (spec.md §8, Invariant 6).
    pub fn len(&self) -> usize {
        (self.tail + CAP - self.head) % CAP
    }

    /// Writes `msg` at `tail` and advances it, under the caller's own
    /// interrupt-disabled context. Fails if the ring is full.
    pub fn push(&mut self, msg: StagedMessage) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        self.slots[self.tail] = Some(msg);
        self.tail = (self.tail + 1) % CAP;
        Ok(())
    }

    /// Reads the message at `head` and advances it. Returns `None` if
    /// empty.
    pub fn pop(&mut self) -> Option<StagedMessage> {
        if self.is_empty() {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % CAP;
        msg
    }
}

impl<const CAP: usize> Default for IsrQueue<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(_t: &Task, _id: u32, _p: *mut u8) {}

    fn msg(id: u32) -> StagedMessage {
        StagedMessage {
            task: Task::new("t", handler),
            id,
            payload: None,
            posted_at: Tick::zero(),
        }
    }

    #[test]
    fn fifo_order() {
        let mut q: IsrQueue<4> = IsrQueue::new();
        q.push(msg(1)).unwrap();
        q.push(msg(2)).unwrap();
        assert_eq!(q.pop().unwrap().id, 1);
        assert_eq!(q.pop().unwrap().id, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn full_at_capacity_minus_one() {
        // CAP = 4 raw slots -> 3 usable.
        let mut q: IsrQueue<4> = IsrQueue::new();
        q.push(msg(1)).unwrap();
        q.push(msg(2)).unwrap();
        q.push(msg(3)).unwrap();
        assert!(q.is_full());
        assert_eq!(q.push(msg(4)), Err(QueueFull));
    }

    #[test]
    fn wraps_around_backing_array() {
        let mut q: IsrQueue<3> = IsrQueue::new();
        q.push(msg(1)).unwrap();
        q.push(msg(2)).unwrap();
        assert_eq!(q.pop().unwrap().id, 1);
        q.push(msg(3)).unwrap();
        assert_eq!(q.pop().unwrap().id, 2);
        assert_eq!(q.pop().unwrap().id, 3);
        assert!(q.is_empty());
    }
}
