// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task control block: one pending message delivery.
//!
//! Per DESIGN NOTES §9 ("Intrusive doubly-linked list"), the natural mapping
//! of the source's raw-pointer doubly-linked list onto a no-heap Rust arena
//! is index fields rather than pointers: `next`/`prev` become
//! `Option<TcbIndex>` into a fixed-capacity array (see
//! [`crate::tcb_pool::TcbPool`]), which keeps the structure acyclic data
//! with index cross-references instead of aliasing raw pointers.

use crate::task::Task;
use crate::time::Tick;

/// Index into a [`crate::tcb_pool::TcbPool`]'s backing array.
pub type TcbIndex = u16;

/// Which side posted this message (spec.md §3, Data Model: TCB).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Origin {
    App,
    Isr,
}

/// One pending message delivery.
///
/// `next`/`prev` are reused for two different purposes depending on where a
/// TCB currently lives, matching the source's intrusive reuse of a single
/// `next` field: while on the free list, only `next` is meaningful and forms
/// a singly linked list (spec.md §4.2); while enqueued in the delay queue,
/// both `next` and `prev` are meaningful and form the doubly linked,
/// expiry-ordered list (spec.md §4.3). A TCB is in at most one of these two
/// lists at a time (spec.md §3, Invariants) — [`crate::tcb_pool::TcbPool`]
/// is responsible for upholding that.
#[derive(Copy, Clone, Debug)]
pub struct Tcb {
    pub(crate) task: Task,
    pub(crate) id: u32,
    pub(crate) payload: Option<core::ptr::NonNull<u8>>,
    pub(crate) expiry: Tick,
    pub(crate) origin: Origin,
    pub(crate) next: Option<TcbIndex>,
    pub(crate) prev: Option<TcbIndex>,
}

impl Tcb {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn payload(&self) -> Option<core::ptr::NonNull<u8>> {
        self.payload
    }

    pub fn expiry(&self) -> Tick {
        self.expiry
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}
