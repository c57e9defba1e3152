// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-fatal diagnostics channel.
//!
//! Grounded on `lib/ringbuf`: a fixed-capacity, overwrite-oldest ring of
//! `Copy` entries, gated so a production build without the `diagnostics`
//! feature pays zero cost, mirroring that crate's own `disabled` feature.
//! Unlike `ringbuf`, which generates a named static per call site via a
//! macro tied to the Hubris/Humility toolchain, this is a single small ring
//! embedded directly in [`crate::Kernel`] — there is only one kind of event
//! source (the kernel itself), so no macro-generated multiplicity is
//! needed.
//!
//! Entries recorded here never affect dispatch (spec.md §7): recording is a
//! side effect of an operation that has already decided what to do.

/// One non-fatal diagnostic event (spec.md §7).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagEvent {
    /// A pool block's begin or end sentinel did not match on free.
    PoolSentinelMismatch,
    /// A pool block's recorded requested size was out of range on free.
    PoolSizeOutOfRange,
    /// A delay-queue entry was delivered after its expiry had already
    /// passed by the given number of ticks.
    LateDelivery { ticks_late: u32 },
}

/// Fixed-capacity ring of the last `N` diagnostic events.
///
/// Overwrites the oldest entry once full, the same policy `ringbuf`
/// documents for its own ring buffers ("historical data may not be
/// available... earliest entries may have fallen off the end").
pub struct DiagRing<const N: usize> {
    entries: [Option<DiagEvent>; N],
    next: usize,
    total: u64,
}

impl<const N: usize> DiagRing<N> {
    pub const fn new() -> Self {
        DiagRing {
            entries: [None; N],
            next: 0,
            total: 0,
        }
    }

    /// Records `event`, overwriting the oldest entry if the ring is full.
    pub fn record(&mut self, event: DiagEvent) {
        self.entries[self.next] = Some(event);
        self.next = (self.next + 1) % N;
        self.total += 1;
    }

    /// Total number of events ever recorded, including ones since
    /// overwritten — lets a caller tell "never happened" from "happened but
    /// fell off the ring", as `ringbuf`'s counted variant does.
    pub fn total_recorded(&self) -> u64 {
        self.total
    }

    /// Iterates recorded entries oldest-to-newest among those still
    /// present.
    pub fn iter(&self) -> impl Iterator<Item = DiagEvent> + '_ {
        let start = self.next;
        (0..N)
            .map(move |i| self.entries[(start + i) % N])
            .flatten()
    }
}

impl<const N: usize> Default for DiagRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_overwrites() {
        let mut ring: DiagRing<2> = DiagRing::new();
        ring.record(DiagEvent::PoolSentinelMismatch);
        ring.record(DiagEvent::PoolSizeOutOfRange);
        ring.record(DiagEvent::LateDelivery { ticks_late: 3 });

        assert_eq!(ring.total_recorded(), 3);
        let seen: Vec<_> = ring.iter().collect();
        assert_eq!(
            seen,
            vec![
                DiagEvent::PoolSizeOutOfRange,
                DiagEvent::LateDelivery { ticks_late: 3 },
            ]
        );
    }

    #[test]
    fn empty_ring_iterates_nothing() {
        let ring: DiagRing<4> = DiagRing::new();
        assert_eq!(ring.iter().count(), 0);
        assert_eq!(ring.total_recorded(), 0);
    }
}
