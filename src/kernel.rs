// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel singleton and dispatch loop (spec.md §4.6, §4.7).
//!
//! Per DESIGN NOTES §9 ("Global singleton"), the whole kernel is a single
//! value whose lifetime is the program; there is no multi-instance support
//! (the ISR port functions it relies on are global by nature). An
//! application declares one `static` (or, in a single-threaded `main`,
//! one local) `Kernel<...>` and calls [`Kernel::construct`] before
//! [`Kernel::run`] — construct-before-loop is enforced as a hard
//! precondition (spec.md §9), fixing the source's unconditional loop-entry
//! defect.

use crate::err::{PoolError, SendError, SendIsrError};
use crate::task::Task;
use crate::tcb::Origin;
use crate::time::Tick;

use crate::delay_queue::DelayQueue;
use crate::isr_queue::{IsrQueue, StagedMessage};
use crate::pool::{FreeOutcome, Pool, PoolLayout};

#[cfg(feature = "diagnostics")]
use crate::diag::{DiagEvent, DiagRing};

/// How many payload pointers [`Kernel::message_cancel`] can hand back
/// directly; callers cancelling more matches than this still get every TCB
/// removed, just not every payload pointer back (see
/// [`crate::delay_queue::DelayQueue::cancel`]).
pub const CANCEL_PAYLOAD_CAPACITY: usize = 8;

/// The kernel singleton.
///
/// `TCB_SLOTS` is the spec.md §6 `UTASK_TCB_SLOTS` option. `ISR_QUEUE_SIZE`
/// is passed straight through as the embedded [`IsrQueue`]'s raw slot
/// count, so per that module's reserved-slot convention the usable ISR
/// staging capacity is `ISR_QUEUE_SIZE - 1`; size it as
/// `UTASK_ISR_QUEUE_SIZE + 1` from spec.md §6 to get exactly that many
/// usable slots.
///
/// `POOL_CLASSES` and `POOL_BACKING` size the embedded memory pool. spec.md
/// §6 describes `POOL_USE` as a switch to elide the pool entirely; Rust's
/// const generics can't drop a struct field conditionally on a cargo
/// feature without leaving these two parameters unused in that
/// configuration, so the elision is realized instead by instantiating
/// `POOL_CLASSES = 0, POOL_BACKING = 0` (a zero-sized pool whose `alloc`
/// always returns [`PoolError::Exhausted`]) — see `DESIGN.md`. The `pool`
/// cargo feature still gates whether [`Kernel::alloc`]/[`Kernel::free`]
/// are compiled in at all, for embeddings that want a compile error rather
/// than a runtime one if pool code is reachable by mistake.
pub struct Kernel<
    const TCB_SLOTS: usize,
    const ISR_QUEUE_SIZE: usize,
    const POOL_CLASSES: usize,
    const POOL_BACKING: usize,
> {
    constructed: bool,
    shutdown: bool,
    tick: Tick,
    delay_queue: DelayQueue<TCB_SLOTS>,
    isr_queue: IsrQueue<ISR_QUEUE_SIZE>,
    pool: Pool<POOL_CLASSES, POOL_BACKING>,
    #[cfg(feature = "diagnostics")]
    diag: DiagRing<16>,
}

impl<const TCB_SLOTS: usize, const ISR_QUEUE_SIZE: usize, const POOL_CLASSES: usize, const POOL_BACKING: usize>
    Kernel<TCB_SLOTS, ISR_QUEUE_SIZE, POOL_CLASSES, POOL_BACKING>
{
    /// Builds a not-yet-constructed kernel with the given pool layout. Pass
    /// `&PoolLayout::new([])` (with `POOL_CLASSES = 0, POOL_BACKING = 0`)
    /// for a build with no pool.
    pub fn new(pool_layout: &PoolLayout<POOL_CLASSES>) -> Self {
        Kernel {
            constructed: false,
            shutdown: false,
            tick: Tick::zero(),
            delay_queue: DelayQueue::new(),
            isr_queue: IsrQueue::new(),
            pool: Pool::new(pool_layout),
            #[cfg(feature = "diagnostics")]
            diag: DiagRing::new(),
        }
    }

    /// Arms the kernel built by [`Kernel::new`] (which already zeroed state
    /// and initialized the pools and queues) by setting the constructed
    /// flag and clearing shutdown. This does not touch `delay_queue`,
    /// `isr_queue`, `pool`, or `tick` — calling it again after messages
    /// have been posted does not reset or drop them, it only re-arms a
    /// kernel that was previously shut down via [`Kernel::destruct`].
    pub fn construct(&mut self) {
        self.constructed = true;
        self.shutdown = false;
    }

    /// Sets the shutdown flag so the next loop iteration exits (spec.md
    /// §4.7).
    pub fn destruct(&mut self) {
        self.shutdown = true;
    }

    /// Advances the tick counter by one, under a critical section (spec.md
    /// §4.1, §4.7). Called from the platform's timer ISR.
    pub fn tick(&mut self) {
        crate::critical::with_interrupts_disabled(|| self.tick.advance());
    }

    /// Returns the current tick. Wrap-aware comparisons of the result are
    /// the caller's responsibility (spec.md §4.7) — reading a monotonically
    /// increasing counter without a critical section is safe because a torn
    /// read still yields a correct after/before decision within the
    /// half-range assumption (spec.md §4.1).
    pub fn get_tick(&self) -> Tick {
        self.tick
    }

    /// Enqueues a message with `expiry = now + delay_ticks`. Fails on TCB
    /// exhaustion or an invalid task (spec.md §4.7). Task-context only.
    pub fn message_send(
        &mut self,
        task: Task,
        id: u32,
        payload: Option<core::ptr::NonNull<u8>>,
        delay_ticks: u32,
    ) -> Result<(), SendError> {
        if !self.constructed {
            return Err(SendError::NotConstructed);
        }
        let expiry = self.tick.offset(delay_ticks);
        crate::critical::with_interrupts_disabled(|| {
            self.delay_queue
                .enqueue(task, id, payload, expiry, Origin::App)
                .map(|_| ())
                .ok_or(SendError::NoFreeTcb)
        })
    }

    /// Stages a message in the ISR ring; fails if full (spec.md §4.7). ISR
    /// context only — does not touch the delay queue or TCB pool directly,
    /// by construction (spec.md §4.4, "Why a separate queue").
    pub fn message_send_isr(
        &mut self,
        task: Task,
        id: u32,
        payload: Option<core::ptr::NonNull<u8>>,
    ) -> Result<(), SendIsrError> {
        let msg = StagedMessage {
            task,
            id,
            payload,
            posted_at: self.tick,
        };
        self.isr_queue
            .push(msg)
            .map_err(|_| SendIsrError::QueueFull)
    }

    /// Removes every delayed entry matching `(task, id)`, returning the
    /// payload pointers of up to [`CANCEL_PAYLOAD_CAPACITY`] removed
    /// entries and the total count removed (spec.md §4.3, §4.7). Never
    /// touches the ISR staging queue (spec.md §8, "ISR isolation") and
    /// must not run from ISR context.
    ///
    /// Per `DESIGN.md`'s resolution of spec.md §9's payload-ownership open
    /// question, the kernel takes ownership of a payload at send time, so
    /// this hands matched payload pointers back to the caller for
    /// disposal instead of leaking them.
    pub fn message_cancel(
        &mut self,
        task: Task,
        id: u32,
    ) -> ([Option<core::ptr::NonNull<u8>>; CANCEL_PAYLOAD_CAPACITY], usize) {
        crate::critical::with_interrupts_disabled(|| {
            self.delay_queue.cancel::<CANCEL_PAYLOAD_CAPACITY>(task, id)
        })
    }

    /// Pool allocation under a critical section (spec.md §4.5, §4.7).
    #[cfg(feature = "pool")]
    pub fn alloc(&mut self, size: usize) -> Result<core::ptr::NonNull<u8>, PoolError> {
        crate::critical::with_interrupts_disabled(|| self.pool.alloc(size))
    }

    /// Pool free under a critical section; `None` and foreign pointers are
    /// ignored (spec.md §4.7). Any debug-mode sentinel mismatch is
    /// forwarded to the diagnostics channel when that feature is enabled.
    #[cfg(feature = "pool")]
    pub fn free(&mut self, ptr: Option<core::ptr::NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        let outcome = crate::critical::with_interrupts_disabled(|| self.pool.free(ptr));
        self.record_free_outcome(outcome);
    }

    #[cfg(all(feature = "pool", feature = "diagnostics"))]
    fn record_free_outcome(&mut self, outcome: FreeOutcome) {
        #[cfg(feature = "pool-debug")]
        match outcome {
            FreeOutcome::SentinelMismatch => self.diag.record(DiagEvent::PoolSentinelMismatch),
            FreeOutcome::SizeOutOfRange => self.diag.record(DiagEvent::PoolSizeOutOfRange),
            FreeOutcome::Ok | FreeOutcome::ForeignPointer => {}
        }
        #[cfg(not(feature = "pool-debug"))]
        let _ = outcome;
    }

    #[cfg(all(feature = "pool", not(feature = "diagnostics")))]
    fn record_free_outcome(&mut self, _outcome: FreeOutcome) {}

    /// Frees a delivered message's payload, if any. With the `pool`
    /// feature disabled this is a no-op: payloads posted in that
    /// configuration must be foreign/static memory the handler itself
    /// manages.
    fn free_payload(&mut self, ptr: Option<core::ptr::NonNull<u8>>) {
        #[cfg(feature = "pool")]
        self.free(ptr);
        #[cfg(not(feature = "pool"))]
        let _ = ptr;
    }

    /// Runs one iteration of the dispatch loop (spec.md §4.6). Returns
    /// `false` once the shutdown flag has been observed, so callers can
    /// drive their own outer loop (or a test can single-step it); `run`
    /// below just loops on this until it returns `false`.
    pub fn step(&mut self) -> Result<bool, SendError> {
        if !self.constructed {
            return Err(SendError::NotConstructed);
        }
        if self.shutdown {
            return Ok(false);
        }

        // One promotion per iteration: if TCB allocation fails, the staged
        // entry is left in the ring for retry on a later iteration
        // (spec.md §4.6, step 2).
        let promoted = crate::critical::with_interrupts_disabled(|| self.isr_queue.pop());
        if let Some(staged) = promoted {
            let inserted = crate::critical::with_interrupts_disabled(|| {
                self.delay_queue.enqueue(
                    staged.task,
                    staged.id,
                    staged.payload,
                    staged.posted_at,
                    Origin::Isr,
                )
            });
            if inserted.is_none() {
                // Put it back for the next iteration instead of dropping
                // it (spec.md §4.6, "the staged entry is left in place for
                // retry").
                crate::critical::with_interrupts_disabled(|| {
                    // Best effort: if the ring is also full this message is
                    // lost, but that can only happen if ISR_QUEUE_SIZE
                    // exceeds TCB_SLOTS, a misconfiguration outside this
                    // kernel's control.
                    let _ = self.isr_queue.push(staged);
                });
            }
        }

        let now = self.tick;
        let due = self
            .delay_queue
            .front()
            .map_or(false, |tcb| now.has_passed(tcb.expiry()));

        if due {
            // Safe to dequeue outside a critical section once we know the
            // front is due: only task context mutates the delay queue's
            // ordering beyond this loop, and this *is* the sole task
            // context in this design.
            let tcb = crate::critical::with_interrupts_disabled(|| self.delay_queue.dequeue())
                .expect("front() and dequeue() observed the same queue state");

            #[cfg(feature = "diagnostics")]
            {
                let late = now.raw().wrapping_sub(tcb.expiry().raw());
                if late > 0 {
                    self.diag.record(DiagEvent::LateDelivery { ticks_late: late });
                }
            }

            let payload_ptr = tcb
                .payload()
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut());
            tcb.task().invoke(tcb.id(), payload_ptr);
            self.free_payload(tcb.payload());
        }

        Ok(true)
    }

    /// Runs until the shutdown flag is set (spec.md §4.7). Precondition:
    /// [`Kernel::construct`] must have already been called.
    pub fn run(&mut self) -> Result<(), SendError> {
        while self.step()? {}
        Ok(())
    }

    #[cfg(feature = "diagnostics")]
    pub fn diagnostics(&self) -> &DiagRing<16> {
        &self.diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    type TestKernel = Kernel<8, 4, 1, 8>;

    fn make_kernel() -> TestKernel {
        const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 1)]);
        let mut k = Kernel::new(&LAYOUT);
        k.construct();
        k
    }

    thread_local! {
        static INVOCATIONS: Cell<[u32; 8]> = Cell::new([u32::MAX; 8]);
        static INVOCATION_COUNT: Cell<usize> = Cell::new(0);
    }

    fn record_invocation(id: u32) {
        INVOCATION_COUNT.with(|c| {
            let i = c.get();
            INVOCATIONS.with(|inv| {
                let mut arr = inv.get();
                if i < arr.len() {
                    arr[i] = id;
                }
                inv.set(arr);
            });
            c.set(i + 1);
        });
    }

    fn reset_invocations() {
        INVOCATION_COUNT.with(|c| c.set(0));
        INVOCATIONS.with(|inv| inv.set([u32::MAX; 8]));
    }

    fn invocation_order() -> Vec<u32> {
        let n = INVOCATION_COUNT.with(|c| c.get());
        INVOCATIONS.with(|inv| inv.get()[..n].to_vec())
    }

    fn recorder_handler(_task: &Task, id: u32, _payload: *mut u8) {
        record_invocation(id);
    }

    #[test]
    fn immediate_messages_deliver_in_post_order() {
        reset_invocations();
        let mut k = make_kernel();
        let a = Task::new("a", recorder_handler);

        k.message_send(a, 1, None, 0).unwrap();
        k.message_send(a, 2, None, 0).unwrap();
        k.message_send(a, 3, None, 0).unwrap();

        // Three due messages: three steps (one delivery per due front per
        // call), each step also drains the (empty) ISR ring.
        k.step().unwrap();
        k.step().unwrap();
        k.step().unwrap();

        assert_eq!(invocation_order(), vec![1, 2, 3]);
    }

    #[test]
    fn delayed_message_is_not_delivered_early() {
        reset_invocations();
        let mut k = make_kernel();
        let a = Task::new("a", recorder_handler);

        k.message_send(a, 1, None, 100).unwrap();

        for _ in 0..99 {
            k.tick();
            k.step().unwrap();
            assert!(invocation_order().is_empty());
        }
        k.tick();
        k.step().unwrap();
        assert_eq!(invocation_order(), vec![1]);
    }

    #[test]
    fn cancel_middle_entry() {
        reset_invocations();
        let mut k = make_kernel();
        let a = Task::new("a", recorder_handler);

        k.message_send(a, 1, None, 100).unwrap();
        k.message_send(a, 2, None, 200).unwrap();
        k.message_send(a, 3, None, 300).unwrap();

        for _ in 0..50 {
            k.tick();
        }
        let (_payloads, count) = k.message_cancel(a, 2);
        assert_eq!(count, 1);

        for _ in 0..250 {
            k.tick();
            k.step().unwrap();
        }
        assert_eq!(invocation_order(), vec![1, 3]);
    }

    #[test]
    fn isr_posted_message_can_beat_a_later_delay_queue_front() {
        reset_invocations();
        let mut k = make_kernel();
        let a = Task::new("a", recorder_handler);

        k.message_send(a, 1, None, 50).unwrap();
        k.message_send_isr(a, 9, None).unwrap();

        // First step promotes the ISR message (expiry = current tick = 0)
        // and, since it's now due, delivers it before anything else.
        k.step().unwrap();
        assert_eq!(invocation_order(), vec![9]);

        for _ in 0..50 {
            k.tick();
            k.step().unwrap();
        }
        assert_eq!(invocation_order(), vec![9, 1]);
    }

    #[test]
    fn run_stops_after_destruct() {
        reset_invocations();
        let mut k = make_kernel();
        let a = Task::new("a", recorder_handler);
        k.message_send(a, 1, None, 0).unwrap();
        k.destruct();
        // Shutdown is observed on the very next step; nothing is delivered.
        k.run().unwrap();
        assert!(invocation_order().is_empty());
    }

    #[test]
    fn run_before_construct_fails() {
        const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 1)]);
        let mut k: TestKernel = Kernel::new(&LAYOUT);
        assert_eq!(k.run(), Err(SendError::NotConstructed));
    }
}
