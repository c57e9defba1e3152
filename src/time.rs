// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel tick representation and wrap-aware comparisons.
//!
//! The tick is advanced by a single call, [`Tick::advance`], made from the
//! platform's periodic timer ISR. Everything else in the kernel treats it as
//! an opaque, monotonically-wrapping counter and compares expiries with the
//! signed-difference idiom rather than a plain `<`, so that a single wrap of
//! the counter does not corrupt ordering (spec.md §3, "Tick semantics").

/// In-kernel timestamp representation.
///
/// This is currently measured in an arbitrary "tick" unit; the conventional
/// rate is 1000 ticks/sec, see [`TICKS_PER_SEC`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Tick(u32);

impl Tick {
    pub const fn zero() -> Self {
        Tick(0)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Tick(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Advances this tick by one, wrapping at `u32::MAX`.
    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Returns `self + delta`, wrapping as the tick counter itself wraps.
    pub fn offset(self, delta: u32) -> Self {
        Tick(self.0.wrapping_add(delta))
    }

    /// `true` iff `self` is at or after `other` under wrap-aware comparison.
    ///
    /// Uses the signed-difference idiom: `a` is *after or at* `b` iff
    /// `(b - a)` as a signed value is `<= 0`. This remains correct across a
    /// single wrap of the counter provided no scheduled delay exceeds half
    /// the tick range (spec.md §3).
    pub fn has_passed(self, other: Self) -> bool {
        let diff = other.0.wrapping_sub(self.0) as i32;
        diff <= 0
    }
}

impl From<u32> for Tick {
    fn from(v: u32) -> Self {
        Tick(v)
    }
}

impl From<Tick> for u32 {
    fn from(v: Tick) -> Self {
        v.0
    }
}

/// Nominal tick rate; basis for the `SEC`/`MIN`/`HOUR` helpers below.
///
/// This is a plain constant rather than a cargo feature so the conversion
/// helpers stay usable in const contexts.
pub const TICKS_PER_SEC: u32 = 1000;

pub const SEC: u32 = TICKS_PER_SEC;
pub const MIN: u32 = 60 * SEC;
pub const HOUR: u32 = 60 * MIN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_wraps() {
        let mut t = Tick::from_raw(u32::MAX);
        t.advance();
        assert_eq!(t.raw(), 0);
    }

    #[test]
    fn has_passed_simple() {
        let now = Tick::from_raw(100);
        assert!(now.has_passed(Tick::from_raw(100)));
        assert!(now.has_passed(Tick::from_raw(50)));
        assert!(!now.has_passed(Tick::from_raw(150)));
    }

    #[test]
    fn has_passed_across_wrap() {
        // Seed near the top of the range and schedule a delay of 10; the
        // kernel expects the wrapped tick to still compare correctly.
        let posted_at = Tick::from_raw(u32::MAX - 5);
        let expiry = posted_at.offset(10);
        assert_eq!(expiry.raw(), 4); // wrapped past MAX

        let mut now = posted_at;
        for _ in 0..9 {
            now.advance();
            assert!(!now.has_passed(expiry), "fired early at {:?}", now);
        }
        now.advance();
        assert!(now.has_passed(expiry));
    }

    #[test]
    fn tick_conversion_helpers() {
        assert_eq!(SEC, 1000);
        assert_eq!(MIN, 60_000);
        assert_eq!(HOUR, 3_600_000);
    }
}
