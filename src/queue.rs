//! # Message Queue
//!
//! Bounded FIFO message queues. A queue is a circular buffer of
//! fixed-size slots; `put` copies an item in at `tail`, `get` copies
//! the oldest item out at `head`, and both indices wrap modulo the
//! capacity.
//!
//! Both operations take a [`BlockMode`]. With `Block` the calling task
//! suspends until the operation can proceed, which makes the pair a
//! ready-made producer/consumer channel. With `NoBlock` a full `put` or
//! empty `get` returns `WouldBlock` immediately and mutates nothing,
//! which is the form safe to use from interrupt handlers.
//!
//! A successful operation wakes one task waiting on the queue, so a
//! producer parked on a full queue resumes after the next `get` and
//! vice versa. One wake per operation; the woken task retests its own
//! predicate before proceeding.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::cortex_m4;
use crate::kernel::{self, KernelError};
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{BlockState, WaitToken};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Blocking behaviour of a queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Suspend the calling task until the operation can complete.
    Block,
    /// Fail with `WouldBlock` instead of suspending.
    NoBlock,
}

/// Bounded FIFO queue state. `count` never leaves `[0, size]`; the
/// queue is empty iff `count == 0` and full iff `count == size`.
pub struct Queue {
    buffer: Box<[u8]>,
    head: usize,
    tail: usize,
    size: usize,
    item_size: usize,
    count: usize,
}

impl Queue {
    /// Items currently queued.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Opaque queue handle: the queue's slot in the kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueId(pub(crate) usize);

/// Outcome of one critical-section attempt at a queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueStep {
    /// The copy happened; `preempt` asks the caller to request a switch
    /// because the operation woke a higher-priority waiter.
    Done { preempt: bool },
    /// The task was tagged as waiting; suspend and retest.
    Suspended,
    /// `NoBlock` and the queue was full (put) or empty (get).
    WouldBlock,
}

// ---------------------------------------------------------------------------
// Kernel-state operations
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Register a queue of `size` slots of `item_size` bytes each.
    pub fn queue_create(&mut self, size: usize, item_size: usize) -> Result<QueueId, KernelError> {
        if size == 0 || item_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let bytes = size
            .checked_mul(item_size)
            .ok_or(KernelError::OutOfMemory)?;

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(bytes).is_err() {
            return Err(KernelError::OutOfMemory);
        }
        buffer.resize(bytes, 0u8);

        if self.queues.try_reserve(1).is_err() {
            return Err(KernelError::OutOfMemory);
        }
        let id = QueueId(self.queues.len());
        self.queues.push(Queue {
            buffer: buffer.into_boxed_slice(),
            head: 0,
            tail: 0,
            size,
            item_size,
            count: 0,
        });
        Ok(id)
    }

    /// One attempt at enqueueing `item`. On a full queue the running
    /// task is tagged as waiting (Block) or the attempt reports
    /// `WouldBlock` (NoBlock) with nothing mutated.
    pub(crate) fn queue_try_put(
        &mut self,
        id: QueueId,
        item: &[u8],
        mode: BlockMode,
    ) -> Result<QueueStep, KernelError> {
        let (size, item_size, count) = {
            let q = &self.queues[id.0];
            (q.size, q.item_size, q.count)
        };
        if item.len() != item_size {
            return Err(KernelError::InvalidArgument);
        }
        if count == size {
            return Ok(self.block_on_queue(id, mode));
        }

        let q = &mut self.queues[id.0];
        let at = q.tail * q.item_size;
        q.buffer[at..at + q.item_size].copy_from_slice(item);
        q.tail = (q.tail + 1) % q.size;
        q.count += 1;

        let preempt = self.unblock_waiters(WaitToken::Queue(id.0));
        Ok(QueueStep::Done { preempt })
    }

    /// One attempt at dequeueing into `item`; mirror image of
    /// [`Self::queue_try_put`].
    pub(crate) fn queue_try_get(
        &mut self,
        id: QueueId,
        item: &mut [u8],
        mode: BlockMode,
    ) -> Result<QueueStep, KernelError> {
        let (item_size, count) = {
            let q = &self.queues[id.0];
            (q.item_size, q.count)
        };
        if item.len() != item_size {
            return Err(KernelError::InvalidArgument);
        }
        if count == 0 {
            return Ok(self.block_on_queue(id, mode));
        }

        let q = &mut self.queues[id.0];
        let at = q.head * q.item_size;
        item.copy_from_slice(&q.buffer[at..at + q.item_size]);
        q.head = (q.head + 1) % q.size;
        q.count -= 1;

        let preempt = self.unblock_waiters(WaitToken::Queue(id.0));
        Ok(QueueStep::Done { preempt })
    }

    fn block_on_queue(&mut self, id: QueueId, mode: BlockMode) -> QueueStep {
        match mode {
            BlockMode::NoBlock => QueueStep::WouldBlock,
            BlockMode::Block => {
                self.tasks[self.running.0].blocked =
                    BlockState::Waiting(WaitToken::Queue(id.0));
                QueueStep::Suspended
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Create a queue holding up to `size` items of `item_size` bytes.
pub fn create(size: usize, item_size: usize) -> Result<QueueId, KernelError> {
    sync::critical_section(|_| unsafe { kernel::state().queue_create(size, item_size) })
}

/// Enqueue one item, copied from `item` (which must be exactly the
/// queue's item size). With `BlockMode::Block` the task suspends while
/// the queue is full; with `NoBlock` a full queue yields `WouldBlock`.
pub fn put(queue: QueueId, item: &[u8], mode: BlockMode) -> Result<(), KernelError> {
    loop {
        let step =
            sync::critical_section(|_| unsafe { kernel::state().queue_try_put(queue, item, mode) })?;
        match step {
            QueueStep::Done { preempt } => {
                if preempt {
                    cortex_m4::trigger_pendsv();
                }
                return Ok(());
            }
            QueueStep::WouldBlock => return Err(KernelError::WouldBlock),
            // Suspend; once another task makes room the wake path clears
            // the tag and the loop retests.
            QueueStep::Suspended => cortex_m4::trigger_pendsv(),
        }
    }
}

/// Dequeue the oldest item into `item` (which must be exactly the
/// queue's item size). Blocking behaviour mirrors [`put`].
pub fn get(queue: QueueId, item: &mut [u8], mode: BlockMode) -> Result<(), KernelError> {
    loop {
        let step =
            sync::critical_section(|_| unsafe { kernel::state().queue_try_get(queue, item, mode) })?;
        match step {
            QueueStep::Done { preempt } => {
                if preempt {
                    cortex_m4::trigger_pendsv();
                }
                return Ok(());
            }
            QueueStep::WouldBlock => return Err(KernelError::WouldBlock),
            QueueStep::Suspended => cortex_m4::trigger_pendsv(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
