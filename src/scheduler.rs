//! # Scheduler
//!
//! The kernel-state record for RondOS: the TCB arena and task ring, the
//! `running` cursor, and every state transition the primitives are built
//! from. One instance lives in `kernel.rs` as a process-wide singleton;
//! all access happens inside critical sections or from the switch
//! exception with interrupts masked.
//!
//! ## Election algorithm
//!
//! The scheduler is a pure decision function over the ring:
//!
//! 1. Start from `running` if it is still runnable, else from the idle
//!    task, so an unrunnable task is never re-elected and the idle task
//!    is always a candidate.
//! 2. Walk the ring once, stopping short of `running`, keeping the best
//!    runnable candidate. The comparison is `>=`, not `>`: among equal
//!    priorities the crown moves to the candidate furthest along the
//!    ring, which yields round-robin on repeated elections.
//! 3. Point `running` at the winner. Nothing else is mutated.
//!
//! O(N) in ring length, and deterministic given the ring order and each
//! task's `priority`, `blocked` and `paused` fields.

use alloc::vec::Vec;

use crate::config::{DEFAULT_TASK_PERIOD, IDLE_STACK_WORDS, MAX_TASKS, MIN_STACK_WORDS};
use crate::kernel::KernelError;
use crate::queue::Queue;
use crate::semaphore::Semaphore;
use crate::task::{self, BlockState, FpuMode, Priority, TaskEntry, TaskId, Tcb, WaitToken};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// Central kernel state: TCB arena, task ring, synchronisation object
/// registries, and the tick/preemption bookkeeping.
///
/// ## Design notes
///
/// - TCBs live in a fixed arena; `TaskId` is a stable index into it and
///   `Tcb::next` links the slots into the circular ring. Slot 0 is the
///   idle task and anchors the ring from the moment the struct is built.
/// - Semaphores and queues are registered in growable tables; their
///   indices are the identities carried by `WaitToken`. Nothing is ever
///   removed, so indices stay valid for the life of the process.
pub struct Scheduler {
    /// Fixed TCB arena. Slot 0 is the idle task; user slots are handed
    /// out in creation order and never reclaimed.
    pub tasks: [Tcb; MAX_TASKS],

    /// The task currently holding the CPU (or about to, once the pended
    /// switch fires).
    pub running: TaskId,

    /// Allocated arena slots, idle task included.
    task_count: usize,

    /// Semaphore registry; `WaitToken::Semaphore` carries an index here.
    pub(crate) sems: Vec<Semaphore>,

    /// Queue registry; `WaitToken::Queue` carries an index here.
    pub(crate) queues: Vec<Queue>,

    /// Ticks between context-switch requests.
    task_period: u32,

    /// Ticks accumulated towards the next preemption point.
    tick_counter: u32,

    /// Set by `init`; until then the tick handler neither expires
    /// timeouts nor requests switches.
    scheduler_enable: bool,

    /// Stack for the idle task, seeded during `init`.
    idle_stack: [u32; IDLE_STACK_WORDS],
}

impl Scheduler {
    /// Build the kernel state. The empty arena already forms a valid
    /// one-element ring (the idle task pointing at itself), so tasks
    /// may be created before `init` runs.
    pub const fn new() -> Self {
        Self {
            tasks: [Tcb::EMPTY; MAX_TASKS],
            running: TaskId::IDLE,
            task_count: 1,
            sems: Vec::new(),
            queues: Vec::new(),
            task_period: DEFAULT_TASK_PERIOD,
            tick_counter: 0,
            scheduler_enable: false,
            idle_stack: [0; IDLE_STACK_WORDS],
        }
    }

    /// Number of tasks in the ring, idle included.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    // -----------------------------------------------------------------------
    // Task creation
    // -----------------------------------------------------------------------

    /// Allocate a TCB, seed its stack, and splice it into the ring just
    /// before `running`.
    ///
    /// With a caller-supplied stack the slice's length is the stack
    /// size and the caller keeps ownership of the memory; otherwise a
    /// stack of `stack_words` words is allocated from the heap and owned
    /// by the TCB. Allocation failure releases everything and reports
    /// `OutOfMemory`; so does arena exhaustion.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        priority: Priority,
        stack: Option<&'static mut [u32]>,
        stack_words: usize,
        fpu: FpuMode,
    ) -> Result<TaskId, KernelError> {
        let words = match &stack {
            Some(s) => s.len(),
            None => stack_words,
        };
        if words < MIN_STACK_WORDS {
            return Err(KernelError::StackTooSmall);
        }
        if priority == Priority::Idle {
            return Err(KernelError::InvalidPriority);
        }
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::OutOfMemory);
        }

        let (sp, owned) = match stack {
            Some(s) => (task::seed_frame(s, entry, fpu), None),
            None => {
                let mut mem = Vec::new();
                if mem.try_reserve_exact(stack_words).is_err() {
                    return Err(KernelError::OutOfMemory);
                }
                mem.resize(stack_words, 0u32);
                let mut mem = mem.into_boxed_slice();
                let sp = task::seed_frame(&mut mem, entry, fpu);
                (sp, Some(mem))
            }
        };

        let id = TaskId(self.task_count);
        self.task_count += 1;

        let tcb = &mut self.tasks[id.0];
        tcb.stack_ptr = sp;
        tcb.blocked = BlockState::Unblocked;
        tcb.timeout = 0;
        tcb.priority = priority;
        tcb.paused = false;
        tcb.stack = owned;

        self.splice_before_running(id);

        #[cfg(feature = "defmt")]
        defmt::trace!("created task {=usize} at priority {=u8}", id.0, priority as u8);

        Ok(id)
    }

    /// Insert `id` into the ring immediately before `running`: walk to
    /// the node whose successor is `running` and hang the new TCB off
    /// it.
    fn splice_before_running(&mut self, id: TaskId) {
        let mut tail = self.running;
        while self.tasks[tail.0].next != self.running {
            tail = self.tasks[tail.0].next;
        }
        self.tasks[id.0].next = self.running;
        self.tasks[tail.0].next = id;
    }

    // -----------------------------------------------------------------------
    // Election
    // -----------------------------------------------------------------------

    /// Elect the next task to run. Invoked only with interrupts masked,
    /// from the context-switch exception after the outgoing context has
    /// been saved.
    pub fn schedule(&mut self) {
        let start = if self.tasks[self.running.0].is_runnable() {
            self.running
        } else {
            TaskId::IDLE
        };

        let mut best = start;
        let mut cursor = self.tasks[start.0].next;
        while cursor != self.running {
            if self.tasks[cursor.0].is_runnable()
                && self.tasks[cursor.0].priority >= self.tasks[best.0].priority
            {
                best = cursor;
            }
            cursor = self.tasks[cursor.0].next;
        }

        self.running = best;
    }

    // -----------------------------------------------------------------------
    // Time and preemption
    // -----------------------------------------------------------------------

    /// Advance the kernel clock by one hardware tick. Returns `true`
    /// when this tick ends a scheduling quantum, in which case the
    /// caller must pend the context-switch exception. Timeout handling
    /// runs on exactly those ticks.
    pub fn tick(&mut self) -> bool {
        self.tick_counter = self.tick_counter.wrapping_add(1);
        if self.scheduler_enable && self.tick_counter >= self.task_period {
            self.tick_counter = 0;
            self.handle_timeouts();
            true
        } else {
            false
        }
    }

    /// Count down sleep timers and wake expired sleepers. Walks the
    /// whole ring except `running`; a paused sleeper's countdown is
    /// frozen until it is resumed.
    pub fn handle_timeouts(&mut self) {
        let head = self.running;
        let mut cursor = self.tasks[head.0].next;
        while cursor != head {
            let tcb = &mut self.tasks[cursor.0];
            if tcb.blocked == BlockState::Sleeping && !tcb.paused && tcb.timeout > 0 {
                tcb.timeout -= 1;
                if tcb.timeout == 0 {
                    tcb.blocked = BlockState::Unblocked;
                }
            }
            cursor = tcb.next;
        }
    }

    /// Turn the scheduler on and record the preemption period (0 falls
    /// back to the default). Called once from `init`.
    pub(crate) fn enable(&mut self, task_period: u32) {
        self.scheduler_enable = true;
        self.task_period = if task_period == 0 {
            DEFAULT_TASK_PERIOD
        } else {
            task_period
        };
    }

    // -----------------------------------------------------------------------
    // Blocking support
    // -----------------------------------------------------------------------

    /// Put the running task to sleep for `ticks` quanta (0 is treated
    /// as 1). The caller requests the context switch.
    pub fn sleep_running(&mut self, ticks: u32) {
        let ticks = if ticks == 0 { 1 } else { ticks };
        let tcb = &mut self.tasks[self.running.0];
        tcb.blocked = BlockState::Sleeping;
        tcb.timeout = ticks;
    }

    /// Pause a task. Returns `Ok(true)` when the paused task is the
    /// running one, in which case the caller must request a switch.
    pub fn pause_task(&mut self, id: TaskId) -> Result<bool, KernelError> {
        let tcb = &mut self.tasks[id.0];
        if tcb.paused {
            return Err(KernelError::AlreadyPaused);
        }
        tcb.paused = true;
        Ok(id == self.running)
    }

    /// Resume a paused task. Never yields; a resumed higher-priority
    /// task wins the next election instead.
    pub fn resume_task(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = &mut self.tasks[id.0];
        if !tcb.paused {
            return Err(KernelError::NotPaused);
        }
        tcb.paused = false;
        Ok(())
    }

    /// Wake the single highest-priority task waiting on `token`
    /// (first-found on ties), excluding `running`. Returns `true` when
    /// the woken task outranks `running` and the caller should request
    /// a context switch. No waiter, no effect.
    pub fn unblock_waiters(&mut self, token: WaitToken) -> bool {
        let head = self.running;
        let mut best: Option<TaskId> = None;
        let mut cursor = self.tasks[head.0].next;
        while cursor != head {
            if self.tasks[cursor.0].blocked == BlockState::Waiting(token) {
                match best {
                    Some(b) if self.tasks[cursor.0].priority <= self.tasks[b.0].priority => {}
                    _ => best = Some(cursor),
                }
            }
            cursor = self.tasks[cursor.0].next;
        }

        match best {
            Some(winner) => {
                self.tasks[winner.0].blocked = BlockState::Unblocked;
                self.tasks[winner.0].priority > self.tasks[head.0].priority
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Idle task
    // -----------------------------------------------------------------------

    /// Seed the idle task's stack so the first dispatch enters
    /// [`idle_task`]. Called from `init` before control is handed over.
    pub(crate) fn seed_idle_stack(&mut self) {
        let sp = task::seed_frame(&mut self.idle_stack, idle_task, FpuMode::Off);
        self.tasks[TaskId::IDLE.0].stack_ptr = sp;
    }
}

/// The idle loop: runs whenever nothing else is runnable, parking the
/// core until the next interrupt.
extern "C" fn idle_task() -> ! {
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

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    extern "C" fn entry_stub() -> ! {
        loop {}
    }

    fn sched_with(priorities: &[Priority]) -> (Scheduler, Vec<TaskId>) {
        let mut sched = Scheduler::new();
        let ids = priorities
            .iter()
            .map(|&p| {
                sched
                    .create_task(entry_stub, p, None, MIN_STACK_WORDS, FpuMode::Off)
                    .unwrap()
            })
            .collect();
        (sched, ids)
    }

    /// Walk the ring from `from`, collecting each hop until it cycles.
    fn ring_from(sched: &Scheduler, from: TaskId) -> Vec<TaskId> {
        let mut order = vec![from];
        let mut cursor = sched.tasks[from.0].next;
        while cursor != from {
            order.push(cursor);
            cursor = sched.tasks[cursor.0].next;
            assert!(order.len() <= MAX_TASKS, "ring does not cycle");
        }
        order
    }

    #[test]
    fn ring_well_formed_after_creates() {
        let (sched, ids) = sched_with(&[Priority::Low, Priority::Medium, Priority::High]);

        let order = ring_from(&sched, TaskId::IDLE);
        assert_eq!(order.len(), ids.len() + 1);
        for id in ids {
            assert_eq!(order.iter().filter(|&&t| t == id).count(), 1);
        }
        // Same cycle seen from any member.
        assert_eq!(ring_from(&sched, order[2]).len(), order.len());
    }

    #[test]
    fn tasks_splice_in_creation_order() {
        let (sched, ids) = sched_with(&[Priority::Low, Priority::Low, Priority::Low]);
        let order = ring_from(&sched, TaskId::IDLE);
        assert_eq!(order[1..], ids[..]);
    }

    #[test]
    fn create_rejects_short_stack() {
        let mut sched = Scheduler::new();
        let err = sched
            .create_task(
                entry_stub,
                Priority::Low,
                None,
                MIN_STACK_WORDS - 1,
                FpuMode::Off,
            )
            .unwrap_err();
        assert_eq!(err, KernelError::StackTooSmall);
        assert_eq!(sched.task_count(), 1);
    }

    #[test]
    fn create_rejects_idle_priority() {
        let mut sched = Scheduler::new();
        let err = sched
            .create_task(entry_stub, Priority::Idle, None, MIN_STACK_WORDS, FpuMode::Off)
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidPriority);
    }

    #[test]
    fn create_fails_when_arena_full() {
        let mut sched = Scheduler::new();
        for _ in 0..MAX_TASKS - 1 {
            sched
                .create_task(entry_stub, Priority::Low, None, MIN_STACK_WORDS, FpuMode::Off)
                .unwrap();
        }
        let err = sched
            .create_task(entry_stub, Priority::Low, None, MIN_STACK_WORDS, FpuMode::Off)
            .unwrap_err();
        assert_eq!(err, KernelError::OutOfMemory);
    }

    #[test]
    fn create_with_caller_stack_points_into_it() {
        let stack: &'static mut [u32] = alloc::boxed::Box::leak(
            vec![0u32; MIN_STACK_WORDS].into_boxed_slice(),
        );
        let base = stack.as_ptr();

        let mut sched = Scheduler::new();
        let id = sched
            .create_task(entry_stub, Priority::Medium, Some(stack), 0, FpuMode::Off)
            .unwrap();

        let expected = unsafe { base.add(MIN_STACK_WORDS - task::FRAME_WORDS) };
        assert_eq!(sched.tasks[id.0].stack_ptr as *const u32, expected);
        // Caller keeps the memory; the TCB owns nothing.
        assert!(sched.tasks[id.0].stack.is_none());
    }

    #[test]
    fn fpu_task_reserves_the_long_frame() {
        let mut sched = Scheduler::new();
        let id = sched
            .create_task(entry_stub, Priority::Medium, None, MIN_STACK_WORDS, FpuMode::On)
            .unwrap();
        let tcb = &sched.tasks[id.0];
        let base = tcb.stack.as_ref().unwrap().as_ptr();
        let expected = unsafe { base.add(MIN_STACK_WORDS - task::FPU_FRAME_WORDS) };
        assert_eq!(tcb.stack_ptr as *const u32, expected);
    }

    #[test]
    fn elects_highest_priority_runnable() {
        let (mut sched, ids) =
            sched_with(&[Priority::Low, Priority::Medium, Priority::High]);

        sched.schedule();
        assert_eq!(sched.running, ids[2]);

        // The high task blocks; the medium one takes over.
        sched.tasks[ids[2].0].blocked = BlockState::Sleeping;
        sched.schedule();
        assert_eq!(sched.running, ids[1]);
    }

    #[test]
    fn lower_priority_never_runs_while_higher_is_ready() {
        let (mut sched, ids) = sched_with(&[Priority::Low, Priority::High]);
        for _ in 0..10 {
            sched.schedule();
            assert_eq!(sched.running, ids[1]);
        }
    }

    #[test]
    fn equal_priorities_round_robin() {
        let (mut sched, ids) = sched_with(&[Priority::Medium, Priority::Medium]);

        let mut seen = Vec::new();
        for _ in 0..4 {
            sched.schedule();
            seen.push(sched.running);
        }
        // The crown alternates between the two equals on every election.
        assert_eq!(seen, vec![ids[1], ids[0], ids[1], ids[0]]);
    }

    #[test]
    fn idle_runs_when_nothing_is_runnable() {
        let (mut sched, ids) = sched_with(&[Priority::Medium, Priority::High]);
        sched.tasks[ids[0].0].blocked = BlockState::Sleeping;
        sched.tasks[ids[1].0].paused = true;

        sched.schedule();
        assert_eq!(sched.running, TaskId::IDLE);
    }

    #[test]
    fn unrunnable_running_is_not_reelected() {
        let (mut sched, ids) = sched_with(&[Priority::Medium, Priority::Medium]);
        sched.schedule();
        let first = sched.running;
        let other = if first == ids[0] { ids[1] } else { ids[0] };

        sched.tasks[first.0].blocked = BlockState::Waiting(WaitToken::Semaphore(0));
        sched.schedule();
        assert_eq!(sched.running, other);
    }

    #[test]
    fn sleeping_task_wakes_after_its_ticks() {
        let (mut sched, ids) = sched_with(&[Priority::Low, Priority::High]);
        sched.enable(1);
        sched.schedule();
        assert_eq!(sched.running, ids[1]);

        // The high task sleeps for three quanta; the low one runs.
        sched.sleep_running(3);
        sched.schedule();
        assert_eq!(sched.running, ids[0]);

        for _ in 0..2 {
            assert!(sched.tick());
            sched.schedule();
            assert_eq!(sched.running, ids[0], "woke early");
        }
        assert!(sched.tick());
        assert_eq!(sched.tasks[ids[1].0].blocked, BlockState::Unblocked);
        sched.schedule();
        assert_eq!(sched.running, ids[1]);
    }

    #[test]
    fn sleep_of_zero_is_one_tick() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);
        sched.running = ids[0];
        sched.sleep_running(0);
        assert_eq!(sched.tasks[ids[0].0].timeout, 1);
        assert_eq!(sched.tasks[ids[0].0].blocked, BlockState::Sleeping);
    }

    #[test]
    fn paused_sleeper_countdown_is_frozen() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);
        sched.running = ids[0];
        sched.sleep_running(2);
        sched.running = TaskId::IDLE;
        sched.pause_task(ids[0]).unwrap();

        sched.enable(1);
        for _ in 0..5 {
            sched.tick();
        }
        assert_eq!(sched.tasks[ids[0].0].timeout, 2);

        sched.resume_task(ids[0]).unwrap();
        sched.tick();
        assert_eq!(sched.tasks[ids[0].0].timeout, 1);
    }

    #[test]
    fn pause_and_resume_protocol_errors() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);

        assert_eq!(sched.resume_task(ids[0]), Err(KernelError::NotPaused));
        assert_eq!(sched.pause_task(ids[0]), Ok(false));
        assert_eq!(sched.pause_task(ids[0]), Err(KernelError::AlreadyPaused));
        assert_eq!(sched.resume_task(ids[0]), Ok(()));
    }

    #[test]
    fn pausing_the_running_task_requests_a_switch() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);
        sched.schedule();
        assert_eq!(sched.running, ids[0]);
        assert_eq!(sched.pause_task(ids[0]), Ok(true));
    }

    #[test]
    fn paused_task_is_never_elected() {
        let (mut sched, ids) = sched_with(&[Priority::Low, Priority::High]);
        sched.pause_task(ids[1]).unwrap();

        sched.schedule();
        assert_eq!(sched.running, ids[0]);

        sched.resume_task(ids[1]).unwrap();
        sched.schedule();
        assert_eq!(sched.running, ids[1]);
    }

    #[test]
    fn unblock_picks_highest_priority_waiter_first_found_on_ties() {
        let (mut sched, ids) = sched_with(&[
            Priority::Low,
            Priority::Medium,
            Priority::Medium,
        ]);
        let token = WaitToken::Queue(0);
        for id in &ids {
            sched.tasks[id.0].blocked = BlockState::Waiting(token);
        }

        // Idle is running; the first-created medium waiter wins.
        assert!(sched.unblock_waiters(token));
        assert_eq!(sched.tasks[ids[1].0].blocked, BlockState::Unblocked);
        assert_eq!(sched.tasks[ids[0].0].blocked, BlockState::Waiting(token));
        assert_eq!(sched.tasks[ids[2].0].blocked, BlockState::Waiting(token));
    }

    #[test]
    fn unblock_requests_switch_only_when_waiter_outranks_running() {
        let (mut sched, ids) = sched_with(&[Priority::High, Priority::Medium]);
        sched.schedule();
        assert_eq!(sched.running, ids[0]);

        let token = WaitToken::Semaphore(0);
        sched.tasks[ids[1].0].blocked = BlockState::Waiting(token);
        // Medium waiter does not outrank the running high task.
        assert!(!sched.unblock_waiters(token));
        assert_eq!(sched.tasks[ids[1].0].blocked, BlockState::Unblocked);
    }

    #[test]
    fn unblock_without_waiters_is_a_noop() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);
        assert!(!sched.unblock_waiters(WaitToken::Semaphore(7)));
        assert_eq!(sched.tasks[ids[0].0].blocked, BlockState::Unblocked);
    }

    #[test]
    fn tick_fires_every_task_period() {
        let mut sched = Scheduler::new();
        sched.enable(4);
        for _ in 0..3 {
            assert!(!sched.tick());
        }
        assert!(sched.tick());
        // Counter restarts after the preemption tick.
        assert!(!sched.tick());
    }

    #[test]
    fn tick_is_inert_until_enabled() {
        let (mut sched, ids) = sched_with(&[Priority::Medium]);
        sched.running = ids[0];
        sched.sleep_running(1);
        sched.running = TaskId::IDLE;

        for _ in 0..10 {
            assert!(!sched.tick());
        }
        // Timeout handling is gated together with preemption.
        assert_eq!(sched.tasks[ids[0].0].timeout, 1);
    }

    #[test]
    fn high_task_sleep_lets_low_task_run() {
        let (mut sched, ids) = sched_with(&[Priority::Low, Priority::High]);
        sched.enable(1);

        sched.schedule();
        assert_eq!(sched.running, ids[1]);

        sched.sleep_running(10);
        sched.schedule();
        assert_eq!(sched.running, ids[0]);

        let mut low_quanta = 0;
        for _ in 0..10 {
            sched.tick();
            sched.schedule();
            if sched.running == ids[0] {
                low_quanta += 1;
            }
        }
        // The low task owned the CPU for the whole sleep, and the high
        // task is back the moment its timeout expires.
        assert_eq!(low_quanta, 9);
        assert_eq!(sched.running, ids[1]);
    }

    #[test]
    fn idle_stack_seeding_targets_the_idle_loop() {
        let mut sched = Scheduler::new();
        sched.seed_idle_stack();
        let sp = sched.tasks[TaskId::IDLE.0].stack_ptr;
        assert!(!sp.is_null());
        // The frame sits at the top of the idle stack.
        let base = sched.idle_stack.as_ptr();
        let expected = unsafe { base.add(IDLE_STACK_WORDS - task::FRAME_WORDS) };
        assert_eq!(sp as *const u32, expected);
    }
}
