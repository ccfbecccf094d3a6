//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2, optional
//! FPU): context switching via PendSV, the SysTick tick handler, and
//! first-task dispatch.
//!
//! ## Context switch mechanism
//!
//! The Cortex-M4 uses a split-stack model: the MSP serves the kernel
//! and all exception handlers, the PSP serves tasks in thread mode. On
//! exception entry the hardware stacks R0-R3, R12, LR, PC and xPSR onto
//! the process stack (plus S0-S15 and FPSCR when the task has a live FP
//! context). The PendSV handler saves the rest, R4-R11 and, for FP
//! tasks, S16-S31.
//!
//! Whether a task carries FP state is recorded by the hardware in the
//! EXC_RETURN value bit 4. The handler pushes that value onto the
//! task's own stack as the last word of the frame, so the shape of each
//! saved frame travels with the frame itself and FP and non-FP tasks
//! can be mixed freely with no side table.
//!
//! ## Exception priorities
//!
//! PendSV and SysTick both run at the lowest priority, so a context
//! switch can never preempt another ISR's stack work; a switch
//! requested from any interrupt simply runs once the last handler
//! returns.

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` off the processor clock.
///
/// Bring-up code calls this (or programs SysTick itself) before
/// `kernel::init`; the kernel owns the handler, not the timer rate.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Request a deferred context switch by pending the PendSV exception.
///
/// Callable from anywhere, including inside a critical section: the
/// exception stays pending while interrupts are masked and fires as
/// soon as they come back.
#[inline]
pub fn trigger_pendsv() {
    // ICSR address 0xE000_ED04, PENDSVSET is bit 28.
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// Exception priority configuration
// ---------------------------------------------------------------------------

/// Drop PendSV and SysTick to the lowest exception priority.
pub fn set_exception_priorities() {
    unsafe {
        // System Handler Priority Register 3 (0xE000_ED20):
        // bits [23:16] PendSV, bits [31:24] SysTick.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// First task dispatch
// ---------------------------------------------------------------------------

/// Launch the first task from its seeded stack frame. Called once from
/// `kernel::init`, with interrupts masked; never returns.
///
/// The seeded frame has no prior exception to return through, so the
/// registers are popped by hand: discard the stored EXC_RETURN marker,
/// switch thread mode onto the process stack, unstack the callee-saved
/// bank and then the hardware frame, re-enable interrupts and branch to
/// the task's entry point.
///
/// # Safety
/// `sp` must point at a frame produced by the stack seeding in `task`,
/// and no task may be running yet.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub unsafe fn first_dispatch(sp: *mut u32) -> ! {
    core::arch::asm!(
        "adds r0, #4",         // discard the exception-return marker
        "msr psp, r0",
        "movs r0, #2",
        "msr control, r0",     // thread mode now runs on the PSP
        "isb",
        "pop {{r4-r11}}",
        "pop {{r0-r3, r12}}",
        "add sp, #4",          // skip the LR slot
        "pop {{lr}}",          // the PC slot: the task entry point
        "add sp, #4",          // skip the xPSR slot
        "cpsie i",
        "bx lr",
        in("r0") sp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler: the context switch itself.
///
/// ## Sequence
/// 1. Mask interrupts and read the outgoing task's PSP.
/// 2. If EXC_RETURN says the task has a live FP context, push S16-S31.
/// 3. Push R4-R11, then EXC_RETURN itself (the frame-shape marker).
/// 4. Store the final pointer in the outgoing TCB.
/// 5. Elect the next task and fetch its saved pointer.
/// 6. Pop the marker and R4-R11; if the marker says FP, pop S16-S31.
/// 7. Write the PSP back, unmask, and exception-return; the hardware
///    restores the outer frame and resumes the task.
///
/// Only R0-R3 and R12 may be touched outside the save/restore pairs;
/// they were already stacked by the hardware on entry.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(
        // Lets the VFP stores assemble on soft-float targets too; the
        // FP paths are unreachable there (EXC_RETURN bit 4 never clear).
        ".fpu vfpv3",

        "cpsid i",
        "mrs r0, psp",

        // FP context live? (EXC_RETURN bit 4 clear)
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",

        "stmdb r0!, {{r4-r11}}",
        "stmdb r0!, {{lr}}",

        "bl {save}",          // stash r0 into the outgoing TCB
        "bl {next}",          // elect; returns the incoming stack pointer

        "ldmia r0!, {{lr}}",
        "ldmia r0!, {{r4-r11}}",

        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",

        "msr psp, r0",
        "cpsie i",
        "bx lr",

        save = sym save_running_context,
        next = sym dispatch_next,
    );
}

/// Record the outgoing task's saved stack pointer. Called from PendSV
/// with interrupts masked.
#[cfg(all(target_arch = "arm", target_os = "none"))]
unsafe extern "C" fn save_running_context(psp: *mut u32) {
    let kernel = crate::kernel::state();
    let running = kernel.running;
    kernel.tasks[running.0].stack_ptr = psp;
}

/// Run the election and hand PendSV the incoming task's saved stack
/// pointer.
#[cfg(all(target_arch = "arm", target_os = "none"))]
unsafe extern "C" fn dispatch_next() -> *mut u32 {
    let kernel = crate::kernel::state();
    kernel.schedule();
    kernel.tasks[kernel.running.0].stack_ptr
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: advances the kernel clock and pends a
/// context switch at the end of every scheduling quantum.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[no_mangle]
extern "C" fn SysTick() {
    crate::sync::critical_section(|_| {
        let kernel = unsafe { crate::kernel::state() };
        if kernel.tick() {
            trigger_pendsv();
        }
    });
}
