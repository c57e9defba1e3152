// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `utask`: a small cooperative, message-driven task kernel for controllers
//! with no heap and no preemption.
//!
//! The design rests on a few naivety principles that keep every operation's
//! cost obvious from its signature, rather than hidden behind amortization:
//!
//! - **No heap.** Every component is sized at compile time through const
//!   generics (`TCB_SLOTS`, `ISR_QUEUE_SIZE`, pool class counts). Capacity
//!   exhaustion is a typed error, never a panic or a block.
//! - **One dispatch loop, one priority.** There is exactly one thread of
//!   execution outside of interrupts; a handler runs to completion before
//!   the next is considered. Concurrency concerns are limited to the
//!   producer/consumer boundary between an ISR and the loop.
//! - **Linear scans over cleverness.** The delay queue and pool are O(n)
//!   over a small, bounded n (tens of outstanding messages, up to four pool
//!   classes). A balanced tree or a buddy allocator would cost more in code
//!   size and audit surface than it would save in cycles at this scale.
//!
//! # Example
//!
//! ```
//! use utask::{Kernel, PoolLayout, Task};
//!
//! fn blink(_task: &Task, id: u32, _payload: *mut u8) {
//!     let _ = id;
//! }
//!
//! const LAYOUT: PoolLayout<1> = PoolLayout::new([(8, 1)]);
//! let mut kernel: Kernel<8, 4, 1, 8> = Kernel::new(&LAYOUT);
//! kernel.construct();
//!
//! let led = Task::new("led", blink);
//! kernel.message_send(led, 0, None, 10).unwrap();
//! kernel.destruct();
//! kernel.run().unwrap();
//! ```
#![cfg_attr(not(test), no_std)]

pub mod critical;
pub mod delay_queue;
#[cfg(feature = "diagnostics")]
pub mod diag;
pub mod err;
pub mod isr_queue;
pub mod kernel;
pub mod pool;
pub mod task;
pub mod tcb;
pub mod tcb_pool;
pub mod time;

pub use crate::delay_queue::DelayQueue;
#[cfg(feature = "diagnostics")]
pub use crate::diag::{DiagEvent, DiagRing};
pub use crate::err::{PoolError, SendError, SendIsrError};
pub use crate::isr_queue::{IsrQueue, QueueFull, StagedMessage};
pub use crate::kernel::{Kernel, CANCEL_PAYLOAD_CAPACITY};
pub use crate::pool::{FreeOutcome, Pool, PoolLayout};
pub use crate::task::{Handler, Task};
pub use crate::tcb::{Origin, Tcb, TcbIndex};
pub use crate::tcb_pool::TcbPool;
pub use crate::time::{Tick, HOUR, MIN, SEC, TICKS_PER_SEC};
