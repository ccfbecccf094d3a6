//! # Kernel
//!
//! The global kernel state and the task-lifecycle API of RondOS.
//!
//! Every public function here (and in `semaphore`/`queue`) is a thin
//! wrapper that enters the critical section, applies one state
//! transition on the [`Scheduler`] singleton, and requests a context
//! switch when the transition calls for one. A switch requested inside
//! a critical section stays pending until the section closes, so the
//! mutate-then-switch ordering is preserved without juggling the
//! interrupt mask by hand.
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► configure SysTick            ← board/bring-up code
//!         ├─► kernel::create_thread() × N
//!         ├─► semaphore/queue creation
//!         └─► kernel::init(period)         ← no return
//!               ├─► scheduler enabled
//!               ├─► PendSV/SysTick to lowest priority
//!               ├─► idle stack seeded
//!               └─► first dispatch of the idle task
//! ```
//!
//! Tasks may be created before or after `init`; the ring is well-formed
//! from the moment the process starts because the idle TCB anchors it.

use crate::arch::cortex_m4;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{FpuMode, Priority, TaskEntry, TaskId};

// ---------------------------------------------------------------------------
// Global kernel state
// ---------------------------------------------------------------------------

/// The one and only kernel-state record.
///
/// # Safety
/// Mutable access goes through [`state`], always inside a critical
/// section or from the switch/tick exceptions, which run with
/// interrupts masked on a single core. No two accessors ever overlap.
static mut KERNEL: Scheduler = Scheduler::new();

/// Borrow the kernel singleton.
///
/// # Safety
/// Callers must hold the critical section (or be an exception handler
/// running with interrupts masked) for the lifetime of the borrow.
pub(crate) unsafe fn state() -> &'static mut Scheduler {
    &mut *core::ptr::addr_of_mut!(KERNEL)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything a kernel operation can report. Each error is returned to
/// the immediate caller; there is no global error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Task stack shorter than `config::MIN_STACK_WORDS`.
    StackTooSmall,
    /// `Priority::Idle` is reserved for the idle task.
    InvalidPriority,
    /// Zero-sized queue dimensions, or an item buffer whose length does
    /// not match the queue's item size.
    InvalidArgument,
    /// Heap exhaustion, or no free TCB slot.
    OutOfMemory,
    /// `pause` on a task that is already paused.
    AlreadyPaused,
    /// `resume` on a task that is not paused.
    NotPaused,
    /// Semaphore release beyond its ceiling.
    MaxCountExceeded,
    /// Non-blocking queue operation on a full (put) or empty (get)
    /// queue. Not a fault, just "try again later".
    WouldBlock,
}

// ---------------------------------------------------------------------------
// Task lifecycle API
// ---------------------------------------------------------------------------

/// Create a task and splice it into the scheduling ring.
///
/// `entry` must never return (returning parks the task in an idle
/// trap). Pass `Some(stack)` to run the task on caller-owned static
/// memory, in which case the slice length is the stack size and
/// `stack_words` is ignored; pass `None` to have the kernel allocate
/// `stack_words` words from the heap. Either way the stack must be at
/// least `config::MIN_STACK_WORDS` words.
///
/// Tasks that touch the FPU must say so with `FpuMode::On`, so their
/// stack is seeded with the floating-point context frame.
pub fn create_thread(
    entry: TaskEntry,
    priority: Priority,
    stack: Option<&'static mut [u32]>,
    stack_words: usize,
    fpu: FpuMode,
) -> Result<TaskId, KernelError> {
    sync::critical_section(|_| unsafe {
        state().create_task(entry, priority, stack, stack_words, fpu)
    })
}

/// Start the kernel. **Does not return.**
///
/// Records the preemption period (in ticks; 0 means every tick), drops
/// the switch and tick exceptions to the lowest priority, seeds the
/// idle task's stack, and dispatches the idle task on the process
/// stack. From the first SysTick onwards the system is preemptive.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn init(task_period: u32) -> ! {
    cortex_m::interrupt::disable();
    let first_sp = unsafe {
        let kernel = state();
        kernel.enable(task_period);
        kernel.seed_idle_stack();
        cortex_m4::set_exception_priorities();
        kernel.tasks[kernel.running.0].stack_ptr
    };
    // Interrupts come back on at the tail of the dispatch sequence.
    unsafe { cortex_m4::first_dispatch(first_sp) }
}

/// Suspend the calling task for `ticks` scheduling quanta. A tick count
/// of 0 is treated as 1, so `sleep` always yields at least once.
pub fn sleep(ticks: u32) {
    sync::critical_section(|_| unsafe { state().sleep_running(ticks) });
    cortex_m4::trigger_pendsv();
}

/// Pause a task indefinitely. Pausing the calling task suspends it on
/// the spot. May be called from interrupt context.
pub fn pause(task: TaskId) -> Result<(), KernelError> {
    let self_pause = sync::critical_section(|_| unsafe { state().pause_task(task) })?;
    if self_pause {
        cortex_m4::trigger_pendsv();
    }
    Ok(())
}

/// Undo a [`pause`]. The resumed task does not run immediately; it
/// competes again from the next election onwards.
pub fn resume(task: TaskId) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { state().resume_task(task) })
}
