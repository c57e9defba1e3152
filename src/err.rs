// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the kernel's public API.
//!
//! Modeled on `kern/src/err.rs`: small `Copy + Debug` enums per fallible
//! operation rather than one catch-all error, so callers can match on
//! exactly the failure modes spec.md §7 enumerates for that operation. No
//! `alloc`-backed error crate is used — the kernel has no heap.

/// Failure modes for [`crate::Kernel::message_send`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendError {
    /// The TCB pool's free list was empty (spec.md §7, "TCB exhaustion").
    NoFreeTcb,
    /// [`crate::Kernel::run`] or `message_send` was called before
    /// [`crate::Kernel::construct`] (spec.md §9, "construct must precede
    /// loop").
    NotConstructed,
}

/// Failure modes for [`crate::Kernel::message_send_isr`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendIsrError {
    /// The ISR staging ring was full (spec.md §7, "ISR queue full").
    QueueFull,
}

/// Failure modes for [`crate::pool::Pool::alloc`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolError {
    /// No class had a large-enough, non-empty free list (spec.md §7, "Pool
    /// exhaustion").
    Exhausted,
}
