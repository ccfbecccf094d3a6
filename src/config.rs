//! # RondOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time; per-task stacks and queue buffers are the only
//! dynamically sized allocations.

/// Maximum number of tasks the kernel can manage, including the idle
/// task in slot 0. This bounds the static TCB arena; slots are handed
/// out in creation order and never reclaimed.
pub const MAX_TASKS: usize = 8;

/// Minimum task stack length in 32-bit words, enforced by
/// `create_thread`. Covers the 51-word FP context frame plus headroom
/// for nested exception entry.
pub const MIN_STACK_WORDS: usize = 64;

/// Idle task stack length in words. The idle loop only ever holds a
/// saved context frame and the hardware exception frame.
pub const IDLE_STACK_WORDS: usize = 32;

/// Default preemption period: a context switch is requested every
/// `task_period` SysTick interrupts. `init` overrides it.
pub const DEFAULT_TASK_PERIOD: u32 = 1;

/// SysTick frequency in Hz. Determines the kernel tick granularity
/// (nominally 1 ms per tick).
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI). Used by the
/// SysTick bring-up helper; adjust for your board's clock tree.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
