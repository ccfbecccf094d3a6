//! # Counting Semaphore
//!
//! Classic counting semaphores. A semaphore is created with an initial
//! count that is also its ceiling; `acquire` takes a unit or blocks the
//! calling task, `release` returns a unit and wakes the best waiter.
//!
//! Semaphores are registered in the kernel's semaphore table and never
//! destroyed; the [`SemaphoreId`] handle is the table index, and doubles
//! as the wait-token identity a blocked task carries.
//!
//! `acquire` must be called from task context. `release` may be called
//! from an interrupt handler as well: the critical section masks the
//! tick and switch interrupts, so both contexts see the same protocol.

use crate::arch::cortex_m4;
use crate::kernel::{self, KernelError};
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{BlockState, WaitToken};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Counting semaphore state. `count` never leaves `[0, max_count]`.
pub struct Semaphore {
    count: u32,
    max_count: u32,
}

impl Semaphore {
    /// Current count. Mostly useful for diagnostics.
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Opaque semaphore handle: the semaphore's slot in the kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreId(pub(crate) usize);

// ---------------------------------------------------------------------------
// Kernel-state operations
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Register a semaphore with `initial` units (also the ceiling).
    pub fn sem_create(&mut self, initial: u8) -> Result<SemaphoreId, KernelError> {
        if self.sems.try_reserve(1).is_err() {
            return Err(KernelError::OutOfMemory);
        }
        let id = SemaphoreId(self.sems.len());
        self.sems.push(Semaphore {
            count: initial as u32,
            max_count: initial as u32,
        });
        Ok(id)
    }

    /// Take a unit if one is available. Otherwise tag the running task
    /// as waiting on this semaphore and report `false`; the caller
    /// suspends and retests after it is woken.
    pub fn sem_try_acquire(&mut self, id: SemaphoreId) -> bool {
        if self.sems[id.0].count > 0 {
            self.sems[id.0].count -= 1;
            true
        } else {
            self.tasks[self.running.0].blocked =
                BlockState::Waiting(WaitToken::Semaphore(id.0));
            false
        }
    }

    /// Return a unit and wake the best waiter. Releasing a semaphore
    /// already at its ceiling is a protocol error and changes nothing.
    /// `Ok(true)` means the woken waiter outranks the running task and
    /// the caller must request a context switch.
    pub fn sem_release(&mut self, id: SemaphoreId) -> Result<bool, KernelError> {
        let sem = &mut self.sems[id.0];
        if sem.count >= sem.max_count {
            return Err(KernelError::MaxCountExceeded);
        }
        sem.count += 1;
        Ok(self.unblock_waiters(WaitToken::Semaphore(id.0)))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Create a counting semaphore whose count starts at `initial`, which
/// is also the maximum it can ever return to.
pub fn create(initial: u8) -> Result<SemaphoreId, KernelError> {
    sync::critical_section(|_| unsafe { kernel::state().sem_create(initial) })
}

/// Acquire a unit, blocking the calling task while the count is zero.
///
/// The wait is untimed; callers wanting a bound combine `kernel::sleep`
/// with their own retry protocol.
pub fn acquire(sem: SemaphoreId) {
    loop {
        let acquired =
            sync::critical_section(|_| unsafe { kernel::state().sem_try_acquire(sem) });
        if acquired {
            return;
        }
        // Suspend; the switch fires once the section above has closed.
        cortex_m4::trigger_pendsv();
    }
}

/// Release a unit. Fails with `MaxCountExceeded` when the semaphore is
/// already full, which guards against unbalanced release calls.
pub fn release(sem: SemaphoreId) -> Result<(), KernelError> {
    let preempt = sync::critical_section(|_| unsafe { kernel::state().sem_release(sem) })?;
    if preempt {
        cortex_m4::trigger_pendsv();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK_WORDS;
    use crate::task::{FpuMode, Priority, TaskId};

    extern "C" fn entry_stub() -> ! {
        loop {}
    }

    fn spawn(sched: &mut Scheduler, priority: Priority) -> TaskId {
        sched
            .create_task(entry_stub, priority, None, MIN_STACK_WORDS, FpuMode::Off)
            .unwrap()
    }

    #[test]
    fn create_starts_at_the_ceiling() {
        let mut sched = Scheduler::new();
        let a = sched.sem_create(3).unwrap();
        let b = sched.sem_create(1).unwrap();
        assert_ne!(a, b);
        assert_eq!(sched.sems[a.0].count, 3);
        assert_eq!(sched.sems[a.0].max_count, 3);
        assert_eq!(sched.sems[b.0].count, 1);
    }

    #[test]
    fn acquire_drains_then_blocks_the_caller() {
        let mut sched = Scheduler::new();
        let task = spawn(&mut sched, Priority::Medium);
        let sem = sched.sem_create(2).unwrap();
        sched.running = task;

        assert!(sched.sem_try_acquire(sem));
        assert!(sched.sem_try_acquire(sem));
        assert_eq!(sched.sems[sem.0].count, 0);

        assert!(!sched.sem_try_acquire(sem));
        assert_eq!(
            sched.tasks[task.0].blocked,
            BlockState::Waiting(WaitToken::Semaphore(sem.0))
        );
    }

    #[test]
    fn release_wakes_the_waiter_and_flags_preemption() {
        let mut sched = Scheduler::new();
        let low = spawn(&mut sched, Priority::Low);
        let high = spawn(&mut sched, Priority::High);
        let sem = sched.sem_create(1).unwrap();

        // The high task drained the semaphore and now waits on it.
        sched.running = high;
        assert!(sched.sem_try_acquire(sem));
        assert!(!sched.sem_try_acquire(sem));

        // The low task releases; the high waiter is woken and outranks it.
        sched.running = low;
        assert_eq!(sched.sem_release(sem), Ok(true));
        assert_eq!(sched.tasks[high.0].blocked, BlockState::Unblocked);
        // The unit stays banked until the waiter reruns its acquire.
        assert_eq!(sched.sems[sem.0].count, 1);
    }

    #[test]
    fn release_does_not_flag_preemption_for_lower_waiters() {
        let mut sched = Scheduler::new();
        let low = spawn(&mut sched, Priority::Low);
        let high = spawn(&mut sched, Priority::High);
        let sem = sched.sem_create(1).unwrap();

        sched.running = low;
        assert!(sched.sem_try_acquire(sem));
        assert!(!sched.sem_try_acquire(sem));

        sched.running = high;
        assert_eq!(sched.sem_release(sem), Ok(false));
        assert_eq!(sched.tasks[low.0].blocked, BlockState::Unblocked);
    }

    #[test]
    fn over_release_is_rejected_without_side_effects() {
        let mut sched = Scheduler::new();
        let task = spawn(&mut sched, Priority::Medium);
        let sem = sched.sem_create(1).unwrap();
        sched.running = task;

        assert_eq!(sched.sem_release(sem), Err(KernelError::MaxCountExceeded));
        assert_eq!(sched.sems[sem.0].count, 1);

        assert!(sched.sem_try_acquire(sem));
        assert_eq!(sched.sems[sem.0].count, 0);

        assert_eq!(sched.sem_release(sem), Ok(false));
        assert_eq!(sched.sems[sem.0].count, 1);

        assert_eq!(sched.sem_release(sem), Err(KernelError::MaxCountExceeded));
        assert_eq!(sched.sems[sem.0].count, 1);
    }

    #[test]
    fn units_are_conserved_across_any_interleaving() {
        let mut sched = Scheduler::new();
        let task = spawn(&mut sched, Priority::Medium);
        let sem = sched.sem_create(4).unwrap();
        sched.running = task;

        let initial = 4i64;
        let mut acquired = 0i64;
        let mut released = 0i64;

        for step in 0..64 {
            if step % 3 == 0 {
                if sched.sem_release(sem).is_ok() {
                    released += 1;
                }
                sched.tasks[task.0].blocked = BlockState::Unblocked;
            } else if sched.sem_try_acquire(sem) {
                acquired += 1;
            } else {
                sched.tasks[task.0].blocked = BlockState::Unblocked;
            }
            let count = sched.sems[sem.0].count as i64;
            assert!(count >= 0 && count <= initial);
            assert_eq!(acquired - released + count, initial);
        }
    }

    #[test]
    fn contended_unit_passes_between_equal_tasks() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, Priority::Medium);
        let b = spawn(&mut sched, Priority::Medium);
        let sem = sched.sem_create(1).unwrap();

        // A holds the unit; B blocks on it.
        sched.running = a;
        assert!(sched.sem_try_acquire(sem));
        sched.running = b;
        assert!(!sched.sem_try_acquire(sem));

        // A releases: B is woken and its retest succeeds.
        sched.running = a;
        assert_eq!(sched.sem_release(sem), Ok(false));
        sched.running = b;
        assert!(sched.sem_try_acquire(sem));
        assert_eq!(sched.sems[sem.0].count, 0);
    }
}
