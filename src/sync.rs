//! # Critical Sections
//!
//! The kernel's sole mutual-exclusion mechanism: masking all maskable
//! interrupts. Every primitive that touches the TCB ring, semaphore
//! counts, queue indices or the tick bookkeeping wraps the access in
//! [`critical_section`]; the tick and switch exceptions run with
//! interrupts masked already.
//!
//! A context switch requested while the section is held stays pending
//! and fires the moment the section closes, so "mutate, then switch"
//! sequences need no special handling.

use cortex_m::interrupt;

/// Execute a closure with all maskable interrupts disabled, restoring
/// the previous mask state on exit (nesting-safe).
///
/// Keep sections short; the tick interrupt is blind while one is held.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
