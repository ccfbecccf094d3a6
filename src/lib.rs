//! # RondOS
//!
//! A compact preemptive RTOS kernel for ARM Cortex-M4 microcontrollers:
//! priority scheduling with round-robin among equals, per-task stacks
//! with optional FPU context, tick-driven sleep, pause/resume, counting
//! semaphores and bounded FIFO message queues.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Application Tasks                      │
//! ├─────────────────────────────────────────────────────────┤
//! │  Kernel API (kernel.rs)      │ semaphore.rs │ queue.rs  │
//! │  create_thread · init ·      │ create       │ create    │
//! │  sleep · pause · resume      │ acquire      │ put       │
//! │                              │ release      │ get       │
//! ├──────────────────────────────┴──────────────┴───────────┤
//! │              Scheduler (scheduler.rs)                    │
//! │   TCB arena · task ring · election · tick/timeouts ·    │
//! │   unblock-waiters                                        │
//! ├─────────────────────────────────────────────────────────┤
//! │        Task model (task.rs) · Critical sections          │
//! │        TCB · Priority · BlockState · stack frames        │
//! ├─────────────────────────────────────────────────────────┤
//! │            Arch port (arch/cortex_m4.rs)                 │
//! │   PendSV context switch · SysTick · first dispatch       │
//! ├─────────────────────────────────────────────────────────┤
//! │          ARM Cortex-M4 hardware (Thumb-2, FPU)           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling model
//!
//! One core, one running task, fully preemptive. Every task lives in a
//! singly-linked circular ring anchored by the always-present idle
//! task. A periodic SysTick drives preemption: every `task_period`
//! ticks the kernel expires sleep timers and pends PendSV, the lowest
//! priority exception, which saves the outgoing context on the task's
//! own stack, elects the highest-priority runnable task (ties rotate
//! round-robin), and restores the incoming context. Blocking
//! primitives reuse the same machinery: they tag the running TCB with
//! what it waits for, pend a switch, and retest when woken.
//!
//! ## Memory model
//!
//! - TCBs live in a fixed arena inside the kernel singleton; handles
//!   are stable indices.
//! - Task stacks are either caller-supplied static slices or heap
//!   allocations owned by the TCB; semaphores, queues and queue
//!   buffers are heap-backed. All allocation is fallible and reported,
//!   and nothing the kernel creates is ever destroyed.
//! - The application supplies the global allocator (the demo uses
//!   `linked_list_allocator`), and creation is expected to happen at
//!   bring-up, not steady state.
//!
//! ## Platform contract
//!
//! The kernel owns the SysTick and PendSV handlers and needs interrupt
//! mask/unmask and the dual-stack (MSP/PSP) mode; everything else,
//! clock trees, peripherals, board bring-up, belongs to the
//! application.

#![no_std]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod kernel;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod sync;
pub mod task;
