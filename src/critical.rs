// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Critical-section discipline for structures shared with ISR context.
//!
//! Modeled on `sys/userlib/src/critical_section.rs` in the teacher corpus:
//! rather than hand-roll a platform-specific interrupt mask/restore pair, the
//! kernel depends on the `critical-section` crate's `acquire`/`release`
//! contract (spec.md §4.1) and wraps it in a scoped guard (DESIGN NOTES §9)
//! so every exit path, including early returns, releases the section.
//!
//! A consuming application selects the backend: on a Cortex-M target that's
//! typically `critical-section/cortex-m` (masking `PRIMASK`); host-side tests
//! in this crate enable `critical-section/std`, which backs the section with
//! a `std::sync::Mutex` — exactly the role the teacher's own
//! `#[cfg(not(target_os = "none"))]` fakes play for non-embedded testing.

use critical_section::RestoreState;

/// A scoped critical section. Interrupts (or the cooperating lock, on a
/// uniprocessor bare-metal target) are masked for the guard's lifetime and
/// restored to their prior state on drop, supporting nested acquisition.
pub struct CriticalSection {
    state: RestoreState,
}

impl CriticalSection {
    /// Enters a critical section, masking interrupts.
    ///
    /// # Safety
    ///
    /// Must not be held across a call that can itself try to acquire a
    /// critical section and block — there is no blocking in this kernel, so
    /// this is always safe to call from task or ISR context.
    pub fn enter() -> Self {
        // Safety: paired with `release` in `Drop`, which runs exactly once.
        let state = unsafe { critical_section::acquire() };
        CriticalSection { state }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        // Safety: `state` came from the matching `acquire` above and is used
        // exactly once.
        unsafe { critical_section::release(self.state) }
    }
}

/// Runs `f` with interrupts disabled, restoring the prior state afterward.
///
/// This is the public-API-level wrapper spec.md §4.5 requires around pool
/// `alloc`/`free`, and the one task-context APIs use around TCB pool and
/// delay queue mutation (spec.md §5, "Shared-resource policy").
pub fn with_interrupts_disabled<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CriticalSection::enter();
    f()
}
