// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed-block memory pool (spec.md §4.5).
//!
//! A slab allocator over up to four independently-sized classes, each with
//! its own free list threaded through the blocks themselves — the same
//! "independent free list per class, single contiguous backing region"
//! shape as any small-embedded slab allocator, sized with const generics
//! the way `fixedmap::FixedMap<K, V, const N: usize>` is in the teacher
//! corpus. `alloc`/`free` are only safe to call with interrupts disabled;
//! [`crate::Kernel`] wraps both unconditionally (spec.md §4.5).

use crate::err::PoolError;

#[cfg(feature = "pool-debug")]
const BEGIN_SIGNATURE: u16 = 0xABCD;
#[cfg(feature = "pool-debug")]
const END_SIGNATURE: u16 = 0xDCBA;
#[cfg(feature = "pool-debug")]
const EMPTY_FILL: u8 = 0xEE;

/// One size class: a fixed block size, a count, and the byte range (within
/// the pool's single backing array) it owns.
#[derive(Copy, Clone)]
struct ClassLayout {
    block_size: usize,
    count: usize,
}

/// Describes up to `CLASSES` size classes, ascending by block size.
///
/// `POOL_COUNTn`/`POOL_SIZEn` (spec.md §6) become the `(size, count)` pairs
/// passed to [`PoolLayout::new`]; a class with `count == 0` is omitted from
/// the backing-size computation (and so costs no storage), matching spec.md
/// §6's "a class with count 0 is omitted".
pub struct PoolLayout<const CLASSES: usize> {
    classes: [ClassLayout; CLASSES],
}

impl<const CLASSES: usize> PoolLayout<CLASSES> {
    /// Builds a layout from `(block_size, count)` pairs, sorting ascending
    /// by block size. A bubble sort is acceptable per spec.md §4.5 ("n ≤
    /// 4"); there is no allocation available to reach for anything fancier
    /// anyway.
    pub const fn new(pairs: [(usize, usize); CLASSES]) -> Self {
        let mut classes = [ClassLayout {
            block_size: 0,
            count: 0,
        }; CLASSES];
        let mut i = 0;
        while i < CLASSES {
            classes[i] = ClassLayout {
                block_size: pairs[i].0,
                count: pairs[i].1,
            };
            i += 1;
        }

        // Bubble sort ascending by block_size.
        let mut i = 0;
        while i < CLASSES {
            let mut j = 0;
            while j + 1 < CLASSES - i {
                if classes[j].block_size > classes[j + 1].block_size {
                    let tmp = classes[j];
                    classes[j] = classes[j + 1];
                    classes[j + 1] = tmp;
                }
                j += 1;
            }
            i += 1;
        }

        PoolLayout { classes }
    }

    /// Per-block debug overhead: a requested-size word plus two 2-byte
    /// sentinels (spec.md §3, Pool block: "[requested-size:word][begin-sig:2B][payload][end-sig:2B]").
    #[cfg(feature = "pool-debug")]
    const DEBUG_OVERHEAD: usize = core::mem::size_of::<usize>() + 2 + 2;
    #[cfg(not(feature = "pool-debug"))]
    const DEBUG_OVERHEAD: usize = 0;

    /// Total backing storage required across every enabled class.
    ///
    /// Per SPEC_FULL.md §12, this sums *every* enabled class unconditionally
    /// — the source's backing-size expression skipped one class's count in
    /// one conditional branch, which this reimplementation does not
    /// reproduce.
    pub const fn backing_bytes(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < CLASSES {
            let c = self.classes[i];
            if c.count > 0 {
                total += (c.block_size + Self::DEBUG_OVERHEAD) * c.count;
            }
            i += 1;
        }
        total
    }
}

/// A multi-class slab allocator over `BACKING` bytes of storage, with up to
/// `CLASSES` size classes.
///
/// `BACKING` must equal `layout.backing_bytes()` for the layout passed to
/// [`Pool::new`]; this isn't checked by const generics alone (the layout is
/// a runtime value, not yet usable in `BACKING`'s position on stable), so
/// [`Pool::new`] asserts it at construction instead.
pub struct Pool<const CLASSES: usize, const BACKING: usize> {
    backing: [u8; BACKING],
    // Byte offset into `backing` where each class's region starts, and the
    // region's length, precomputed at construction.
    region_start: [usize; CLASSES],
    region_len: [usize; CLASSES],
    block_size: [usize; CLASSES],
    // Free list head per class, as a byte offset from the start of
    // `backing` (not the region), or `usize::MAX` for "empty".
    free_head: [usize; CLASSES],
}

const NONE_OFFSET: usize = usize::MAX;

impl<const CLASSES: usize, const BACKING: usize> Pool<CLASSES, BACKING> {
    /// Builds the pool: sorts class descriptors ascending by size (done
    /// already by [`PoolLayout::new`]), carves `backing` into per-class
    /// regions, and chains each region's blocks into that class's free list
    /// (spec.md §4.5, construction steps 1-2).
    pub fn new(layout: &PoolLayout<CLASSES>) -> Self {
        assert_eq!(
            layout.backing_bytes(),
            BACKING,
            "Pool's BACKING const generic must equal layout.backing_bytes()"
        );

        let mut region_start = [0usize; CLASSES];
        let mut region_len = [0usize; CLASSES];
        let mut block_size = [0usize; CLASSES];
        let mut free_head = [NONE_OFFSET; CLASSES];

        let mut offset = 0;
        for (i, c) in layout.classes.iter().enumerate() {
            block_size[i] = c.block_size;
            if c.count == 0 {
                region_start[i] = offset;
                region_len[i] = 0;
                continue;
            }
            assert!(
                c.block_size >= core::mem::size_of::<usize>(),
                "pool block size must be at least a pointer wide, to hold the free-list link"
            );
            let stride = c.block_size + PoolLayout::<CLASSES>::DEBUG_OVERHEAD;
            region_start[i] = offset;
            region_len[i] = stride * c.count;
            offset += region_len[i];
        }

        let mut pool = Pool {
            backing: [0u8; BACKING],
            region_start,
            region_len,
            block_size,
            free_head,
        };

        for i in 0..CLASSES {
            let c = &layout.classes[i];
            if c.count == 0 {
                continue;
            }
            let stride = c.block_size + PoolLayout::<CLASSES>::DEBUG_OVERHEAD;
            // Chain blocks within the region into a singly linked free
            // list, last block pointing to "none".
            let mut head = NONE_OFFSET;
            let mut b = c.count;
            while b > 0 {
                b -= 1;
                let block_off = pool.region_start[i] + b * stride;
                pool.write_free_link(block_off, head);
                head = block_off;
            }
            free_head[i] = head;
        }
        pool.free_head = free_head;
        pool
    }

    fn write_free_link(&mut self, block_off: usize, next: usize) {
        let bytes = next.to_ne_bytes();
        let n = bytes.len();
        self.backing[block_off..block_off + n].copy_from_slice(&bytes);
    }

    fn read_free_link(&self, block_off: usize) -> usize {
        let n = core::mem::size_of::<usize>();
        let mut bytes = [0u8; core::mem::size_of::<usize>()];
        bytes.copy_from_slice(&self.backing[block_off..block_off + n]);
        usize::from_ne_bytes(bytes)
    }

    /// Linearly scans classes and returns the first whose block size is at
    /// least `size` and whose free list is non-empty (spec.md §4.5).
    fn class_for(&self, size: usize) -> Option<usize> {
        (0..CLASSES).find(|&i| self.block_size[i] >= size && self.free_head[i] != NONE_OFFSET)
    }

    /// Allocates a block of at least `size` bytes, or fails if no class
    /// fits (too large for every class, or all fitting classes are
    /// exhausted). Must be called with interrupts disabled
    /// ([`crate::critical::with_interrupts_disabled`] does this).
    pub fn alloc(&mut self, size: usize) -> Result<core::ptr::NonNull<u8>, PoolError> {
        let class = self.class_for(size).ok_or(PoolError::Exhausted)?;
        let block_off = self.free_head[class];
        self.free_head[class] = self.read_free_link(block_off);

        let payload_off = self.payload_offset(class, block_off);

        #[cfg(feature = "pool-debug")]
        {
            self.write_debug_header(class, block_off, size);
            let payload_len = self.block_size[class];
            self.backing[payload_off..payload_off + payload_len].fill(EMPTY_FILL);
        }

        let ptr = unsafe { self.backing.as_mut_ptr().add(payload_off) };
        Ok(core::ptr::NonNull::new(ptr).expect("backing array pointer is never null"))
    }

    /// Frees `ptr`. If `ptr` does not fall inside this pool's backing array,
    /// this is a silent no-op — the property the ISR send path relies on
    /// when a posted payload did not originate from the pool (spec.md
    /// §4.5, §3 Ownership). The block is returned to its class's free list
    /// even when a debug check below reports a mismatch (spec.md §4.5,
    /// "the block is still returned to the free list").
    pub fn free(&mut self, ptr: core::ptr::NonNull<u8>) -> FreeOutcome {
        let base = self.backing.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base || addr >= base + BACKING {
            return FreeOutcome::ForeignPointer;
        }
        let payload_off = addr - base;

        let Some(class) = self.class_containing_payload(payload_off) else {
            return FreeOutcome::ForeignPointer;
        };
        let block_off = self.block_offset(class, payload_off);

        #[cfg(feature = "pool-debug")]
        let outcome = self.check_debug_footer(class, block_off);
        #[cfg(not(feature = "pool-debug"))]
        let outcome = FreeOutcome::Ok;

        self.write_free_link(block_off, self.free_head[class]);
        self.free_head[class] = block_off;
        outcome
    }

    #[cfg(not(feature = "pool-debug"))]
    fn payload_offset(&self, _class: usize, block_off: usize) -> usize {
        block_off
    }

    #[cfg(feature = "pool-debug")]
    fn payload_offset(&self, _class: usize, block_off: usize) -> usize {
        block_off + core::mem::size_of::<usize>() + 2
    }

    #[cfg(not(feature = "pool-debug"))]
    fn block_offset(&self, _class: usize, payload_off: usize) -> usize {
        payload_off
    }

    #[cfg(feature = "pool-debug")]
    fn block_offset(&self, _class: usize, payload_off: usize) -> usize {
        payload_off - core::mem::size_of::<usize>() - 2
    }

    fn class_containing_payload(&self, payload_off: usize) -> Option<usize> {
        (0..CLASSES).find(|&i| {
            if self.region_len[i] == 0 {
                return false;
            }
            let start = self.region_start[i];
            let end = start + self.region_len[i];
            payload_off >= start && payload_off < end
        })
    }

    #[cfg(feature = "pool-debug")]
    fn write_debug_header(&mut self, class: usize, block_off: usize, requested: usize) {
        let mut off = block_off;
        let size_bytes = requested.to_ne_bytes();
        self.backing[off..off + size_bytes.len()].copy_from_slice(&size_bytes);
        off += size_bytes.len();
        self.backing[off..off + 2].copy_from_slice(&BEGIN_SIGNATURE.to_ne_bytes());
        off += 2 + self.block_size[class];
        self.backing[off..off + 2].copy_from_slice(&END_SIGNATURE.to_ne_bytes());
    }

    /// Checks the debug header/footer on free. Any mismatch is reported to
    /// the caller (who forwards it to the diagnostics channel if enabled);
    /// the block is returned to the free list regardless (spec.md §4.5,
    /// Debug mode).
    #[cfg(feature = "pool-debug")]
    fn check_debug_footer(&self, class: usize, block_off: usize) -> FreeOutcome {
        let size_field_len = core::mem::size_of::<usize>();
        let mut off = block_off;
        let mut size_bytes = [0u8; core::mem::size_of::<usize>()];
        size_bytes.copy_from_slice(&self.backing[off..off + size_field_len]);
        let recorded_size = usize::from_ne_bytes(size_bytes);
        off += size_field_len;

        let mut begin = [0u8; 2];
        begin.copy_from_slice(&self.backing[off..off + 2]);
        off += 2 + self.block_size[class];

        let mut end = [0u8; 2];
        end.copy_from_slice(&self.backing[off..off + 2]);

        let begin_ok = u16::from_ne_bytes(begin) == BEGIN_SIGNATURE;
        let end_ok = u16::from_ne_bytes(end) == END_SIGNATURE;
        let size_ok = recorded_size <= self.block_size[class];

        if recorded_size > self.block_size[class] {
            let _ = size_ok; // already folded below, kept for clarity
            return FreeOutcome::SizeOutOfRange;
        }
        if !begin_ok || !end_ok {
            return FreeOutcome::SentinelMismatch;
        }
        FreeOutcome::Ok
    }
}

/// Result of [`Pool::free`], surfaced so a caller can forward non-fatal
/// mismatches to the diagnostics channel (spec.md §7).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FreeOutcome {
    /// Freed normally (or no debug checking was compiled in).
    Ok,
    /// `ptr` did not fall inside this pool's backing array; no-op.
    ForeignPointer,
    /// A begin or end sentinel did not match (debug builds only).
    #[cfg(feature = "pool-debug")]
    SentinelMismatch,
    /// The recorded requested size exceeded the block's class size (debug
    /// builds only).
    #[cfg(feature = "pool-debug")]
    SizeOutOfRange,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_class_alloc_exhaust_free_retry() {
        const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 1)]);
        let mut pool: Pool<1, { LAYOUT.backing_bytes() }> = Pool::new(&LAYOUT);

        let p1 = pool.alloc(4).unwrap();
        assert_eq!(pool.alloc(4), Err(PoolError::Exhausted));

        pool.free(p1);
        assert!(pool.alloc(4).is_ok());
    }

    #[test]
    fn picks_smallest_fitting_class() {
        const LAYOUT: PoolLayout<3> = PoolLayout::new([(64, 2), (8, 2), (16, 2)]);
        let mut pool: Pool<3, { LAYOUT.backing_bytes() }> = Pool::new(&LAYOUT);

        // Request for 10 bytes should land in the 16-byte class, not 64.
        let p = pool.alloc(10).unwrap();
        let base = pool.backing.as_ptr() as usize;
        let off = p.as_ptr() as usize - base;
        // The 8-byte class sorts first, then 16, then 64; off should fall
        // in the 16-byte region, which starts right after the 8-byte
        // region (2 blocks * 8 bytes = 16).
        assert!(off >= 16 && off < 16 + 2 * 16);
    }

    #[test]
    fn oversized_request_fails_even_with_free_blocks() {
        const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 4)]);
        let mut pool: Pool<1, { LAYOUT.backing_bytes() }> = Pool::new(&LAYOUT);
        assert_eq!(pool.alloc(9), Err(PoolError::Exhausted));
    }

    #[test]
    fn free_of_foreign_pointer_is_noop() {
        const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 1)]);
        let mut pool: Pool<1, { LAYOUT.backing_bytes() }> = Pool::new(&LAYOUT);

        let mut stray = [0u8; 8];
        let foreign = core::ptr::NonNull::new(stray.as_mut_ptr()).unwrap();
        pool.free(foreign); // must not panic or corrupt state

        // The pool's own block is still fully available afterward.
        assert!(pool.alloc(8).is_ok());
        assert_eq!(pool.alloc(8), Err(PoolError::Exhausted));
    }

    #[test]
    fn zero_count_class_is_omitted_from_backing() {
        const WITH_ZERO: PoolLayout<2> = PoolLayout::new([(8, 0), (16, 2)]);
        const WITHOUT: PoolLayout<1> = PoolLayout::new([(16, 2)]);
        assert_eq!(WITH_ZERO.backing_bytes(), WITHOUT.backing_bytes());
    }

    #[test]
    fn backing_size_counts_every_enabled_class() {
        // Regression for SPEC_FULL.md §12: the source's backing-size
        // expression dropped one class's count in one branch. All four
        // classes enabled must sum completely.
        const LAYOUT: PoolLayout<4> = PoolLayout::new([(8, 2), (16, 2), (32, 2), (64, 2)]);
        assert_eq!(LAYOUT.backing_bytes(), (8 + 16 + 32 + 64) * 2);
    }
}
