//! # Task Control Block
//!
//! Defines the task model for RondOS: the per-task descriptor (TCB), the
//! scheduling state machine, and the initial stack frames that make a
//! freshly created task restorable by the context-switch exception.
//!
//! ## Task state machine
//!
//! ```text
//!   READY ──sleep(t)──────────────▶ SLEEPING ──timeout expires──▶ READY
//!   READY ──acquire/get/put──────▶ WAITING(obj) ──unblocked────▶ READY
//!   READY ──pause────────────────▶ PAUSED ──resume─────────────▶ READY
//! ```
//!
//! RUNNING is READY plus the scheduler's `running` cursor pointing at the
//! task. The `paused` flag is orthogonal to `blocked` and may coexist
//! with SLEEPING or WAITING; a paused sleeper's countdown is frozen.

use alloc::boxed::Box;

// ---------------------------------------------------------------------------
// Scheduling state
// ---------------------------------------------------------------------------

/// The function signature for task entry points. Tasks run forever and
/// take no arguments; a task that returns anyway lands in [`task_exit`].
pub type TaskEntry = extern "C" fn() -> !;

/// Task priority. The scheduler always elects the highest-priority
/// runnable task; equals share the CPU round-robin.
///
/// `Idle` is reserved for the kernel's idle task (arena slot 0) and is
/// rejected by `create_thread`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

/// Identity of the synchronisation object a task is waiting on. The
/// payload is the object's index in the kernel's semaphore or queue
/// registry; indices are stable because objects are never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitToken {
    Semaphore(usize),
    Queue(usize),
}

/// The wait-token field of a TCB.
///
/// A task is *runnable* iff it is `Unblocked` and not paused. `Sleeping`
/// means the countdown in `Tcb::timeout` is pending; `Waiting` names the
/// semaphore or queue the task is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Unblocked,
    Sleeping,
    Waiting(WaitToken),
}

/// Whether a task's stack is seeded with the floating-point context
/// frame. FP tasks carry the 32 single-precision registers and FPSCR
/// through every context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpuMode {
    Off,
    On,
}

/// Opaque task handle: the task's slot in the TCB arena. Handles are
/// only produced by `create_thread` and stay valid for the lifetime of
/// the process (tasks are never destroyed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// The idle task, arena slot 0. Not exposed to users.
    pub(crate) const IDLE: TaskId = TaskId(0);
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB), one per task, alive for the whole process.
///
/// TCBs live in the scheduler's fixed arena and are linked into a
/// singly-linked circular ring through `next`; the ring always contains
/// the idle TCB, so it is well-formed even with zero user tasks.
pub struct Tcb {
    /// Saved process stack pointer, pointing at the top of the stored
    /// context frame. Only valid while the task is not running; written
    /// exclusively by the context-switch exception with interrupts
    /// masked.
    pub stack_ptr: *mut u32,

    /// Wait-token: what, if anything, the task is blocked on.
    pub blocked: BlockState,

    /// Successor in the circular task ring (arena index).
    pub next: TaskId,

    /// Remaining sleep ticks. Meaningful only while `blocked` is
    /// `Sleeping`.
    pub timeout: u32,

    /// Scheduling priority. Slot 0 is the unique `Idle` holder.
    pub priority: Priority,

    /// Pause flag, orthogonal to `blocked`.
    pub paused: bool,

    /// Backing storage when the kernel allocated this task's stack.
    /// `None` for caller-supplied stacks and the idle task.
    pub(crate) stack: Option<Box<[u32]>>,
}

// Safety: the raw stack pointer always targets the task's own stack
// (boxed, caller-static, or the kernel's idle stack), none of which
// move. TCBs are only touched inside critical sections or from the
// switch exception with interrupts masked.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    /// An unallocated arena slot. Slot 0 doubles as the idle task: the
    /// empty TCB is already a valid idle descriptor (priority `Idle`,
    /// runnable, `next` pointing at slot 0, so a lone idle TCB forms a
    /// one-element ring).
    pub const EMPTY: Tcb = Tcb {
        stack_ptr: core::ptr::null_mut(),
        blocked: BlockState::Unblocked,
        next: TaskId::IDLE,
        timeout: 0,
        priority: Priority::Idle,
        paused: false,
        stack: None,
    };

    /// A task is runnable iff it is unblocked and not paused.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.blocked == BlockState::Unblocked && !self.paused
    }
}

// ---------------------------------------------------------------------------
// Initial stack frames
// ---------------------------------------------------------------------------

/// Words occupied by a saved integer context: the exception-return
/// marker, R4-R11, and the 8-word hardware frame.
pub(crate) const FRAME_WORDS: usize = 17;

/// Words occupied by a saved FP context: the integer frame plus S16-S31,
/// S0-S15, FPSCR and the frame aligner.
pub(crate) const FPU_FRAME_WORDS: usize = 51;

/// Initial xPSR: only the Thumb bit, the sole execution state on
/// ARMv7-M.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// EXC_RETURN for "thread mode, process stack, no FP context". Stored
/// on the stack as the first word popped, so the switch routine knows
/// which frame shape follows.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// EXC_RETURN for "thread mode, process stack, FP context active"
/// (bit 4 clear).
const EXC_RETURN_THREAD_PSP_FPU: u32 = 0xFFFF_FFED;

/// Seed a stack with the synthetic frame matching `fpu`, returning the
/// initial saved stack pointer for the TCB.
pub(crate) fn seed_frame(stack: &mut [u32], entry: TaskEntry, fpu: FpuMode) -> *mut u32 {
    match fpu {
        FpuMode::Off => seed_stack(stack, entry),
        FpuMode::On => seed_fpu_stack(stack, entry),
    }
}

/// Seed the 17-word integer frame at the top of `stack`.
///
/// Layout, ascending addresses from the returned pointer:
///
/// ```text
/// [len-17] EXC_RETURN marker (no FP)
/// [len-16] R4 .. [len-9] R11
/// [len-8]  R0 .. [len-5] R3
/// [len-4]  R12
/// [len-3]  LR   (task_exit trap)
/// [len-2]  PC   (task entry point)
/// [len-1]  xPSR (Thumb bit)
/// ```
fn seed_stack(stack: &mut [u32], entry: TaskEntry) -> *mut u32 {
    let n = stack.len();
    for word in &mut stack[n - FRAME_WORDS..] {
        *word = 0;
    }
    stack[n - 1] = INITIAL_XPSR;
    stack[n - 2] = entry as usize as u32;
    stack[n - 3] = task_exit as usize as u32;
    stack[n - FRAME_WORDS] = EXC_RETURN_THREAD_PSP;
    &mut stack[n - FRAME_WORDS] as *mut u32
}

/// Seed the 51-word FP frame: as [`seed_stack`] but with zeroed S0-S31
/// banks, FPSCR and the aligner word the hardware expects on an
/// FP-context exception return.
fn seed_fpu_stack(stack: &mut [u32], entry: TaskEntry) -> *mut u32 {
    let n = stack.len();
    for word in &mut stack[n - FPU_FRAME_WORDS..] {
        *word = 0;
    }
    // Hardware frame: R0-R3, R12, LR, PC, xPSR, S0-S15, FPSCR, aligner.
    stack[n - 19] = INITIAL_XPSR;
    stack[n - 20] = entry as usize as u32;
    stack[n - 21] = task_exit as usize as u32;
    // Software frame: marker, R4-R11, S16-S31.
    stack[n - FPU_FRAME_WORDS] = EXC_RETURN_THREAD_PSP_FPU;
    &mut stack[n - FPU_FRAME_WORDS] as *mut u32
}

/// Trap for tasks that return from their entry function. Entry return
/// is undefined behaviour as far as scheduling goes; parking the task
/// here keeps it from running off the seeded frame.
pub(crate) extern "C" fn task_exit() -> ! {
    loop {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
