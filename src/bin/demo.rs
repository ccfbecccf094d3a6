//! # RondOS Demo Firmware
//!
//! Exercises every kernel primitive on a Cortex-M4 board:
//!
//! | Task        | Priority | Shows |
//! |-------------|----------|-------|
//! | `heartbeat` | High     | periodic sleep; preempts everything while awake |
//! | `dsp`       | Medium   | FPU context survival across switches |
//! | `worker_a/b`| Medium   | semaphore-guarded shared counter |
//! | `producer`  | Low      | blocking queue put |
//! | `consumer`  | Medium   | blocking queue get |
//! | `monitor`   | Low      | pause/resume, caller-supplied static stack |
//!
//! Watch the atomic counters in a debugger to see the schedule: the
//! heartbeat advances ten-tick-wise, the worker counter climbs without
//! lost increments, and the consumer's checksum tracks the producer's
//! sequence. While the monitor holds `heartbeat` paused, its counter
//! freezes and the medium tasks soak up the freed quanta.
//!
//! Builds only for the target; on the host this file is an empty stub
//! so `cargo test` stays runnable.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::cell::UnsafeCell;
    use core::sync::atomic::{AtomicU32, Ordering};

    use cortex_m_rt::entry;
    use linked_list_allocator::LockedHeap;
    use panic_halt as _;

    use rondos::arch::cortex_m4;
    use rondos::kernel;
    use rondos::queue::{self, BlockMode, QueueId};
    use rondos::semaphore::{self, SemaphoreId};
    use rondos::task::{FpuMode, Priority, TaskId};

    // -----------------------------------------------------------------------
    // Heap
    // -----------------------------------------------------------------------

    #[global_allocator]
    static HEAP: LockedHeap = LockedHeap::empty();

    const HEAP_SIZE: usize = 16 * 1024;
    static mut HEAP_MEM: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    // -----------------------------------------------------------------------
    // Shared state
    // -----------------------------------------------------------------------

    /// One-shot handle slot, written in `main` before the scheduler
    /// starts and read-only afterwards.
    struct HandleCell<T>(UnsafeCell<Option<T>>);

    // Safety: written once before any task runs, then only read.
    unsafe impl<T> Sync for HandleCell<T> {}

    impl<T: Copy> HandleCell<T> {
        const fn new() -> Self {
            Self(UnsafeCell::new(None))
        }
        fn set(&self, value: T) {
            unsafe { *self.0.get() = Some(value) }
        }
        fn get(&self) -> T {
            unsafe { (*self.0.get()).unwrap() }
        }
    }

    static COUNTER_SEM: HandleCell<SemaphoreId> = HandleCell::new();
    static SAMPLES: HandleCell<QueueId> = HandleCell::new();
    static HEARTBEAT_TASK: HandleCell<TaskId> = HandleCell::new();

    static HEARTBEATS: AtomicU32 = AtomicU32::new(0);
    static WORKED: AtomicU32 = AtomicU32::new(0);
    static DSP_MILLIS: AtomicU32 = AtomicU32::new(0);
    static CHECKSUM: AtomicU32 = AtomicU32::new(0);

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// High priority: a short burst every 10 ticks. Everything else
    /// only runs while this task sleeps.
    extern "C" fn heartbeat_main() -> ! {
        loop {
            HEARTBEATS.fetch_add(1, Ordering::Relaxed);
            kernel::sleep(10);
        }
    }

    /// Medium priority, FPU: the float state must survive arbitrary
    /// preemption by the other tasks.
    extern "C" fn dsp_main() -> ! {
        let mut angle: f32 = 0.0;
        loop {
            angle += 0.01;
            if angle > core::f32::consts::TAU {
                angle -= core::f32::consts::TAU;
            }
            let sample = libm_free_sine(angle) * 0.5 + 0.5;
            DSP_MILLIS.store((sample * 1000.0) as u32, Ordering::Relaxed);
            kernel::sleep(5);
        }
    }

    /// Cheap polynomial sine approximation, enough to keep the FPU busy.
    fn libm_free_sine(x: f32) -> f32 {
        let x2 = x * x;
        x * (1.0 - x2 / 6.0 + (x2 * x2) / 120.0)
    }

    /// The two medium workers bump a shared counter under a binary
    /// semaphore, then yield a tick to each other.
    extern "C" fn worker_main() -> ! {
        let sem = COUNTER_SEM.get();
        loop {
            semaphore::acquire(sem);
            WORKED.fetch_add(1, Ordering::Relaxed);
            let _ = semaphore::release(sem);
            kernel::sleep(1);
        }
    }

    /// Low-priority producer: pushes a rolling sequence, blocking
    /// whenever the consumer falls behind.
    extern "C" fn producer_main() -> ! {
        let q = SAMPLES.get();
        let mut seq: u32 = 0;
        loop {
            seq = seq.wrapping_add(1);
            let _ = queue::put(q, &seq.to_le_bytes(), BlockMode::Block);
            kernel::sleep(2);
        }
    }

    /// Medium-priority consumer: drains the queue in arrival order.
    extern "C" fn consumer_main() -> ! {
        let q = SAMPLES.get();
        let mut buf = [0u8; 4];
        loop {
            let _ = queue::get(q, &mut buf, BlockMode::Block);
            CHECKSUM.fetch_add(u32::from_le_bytes(buf), Ordering::Relaxed);
        }
    }

    /// Low-priority monitor on a caller-supplied stack: freezes the
    /// heartbeat for a stretch, then lets it go again.
    extern "C" fn monitor_main() -> ! {
        let heartbeat = HEARTBEAT_TASK.get();
        loop {
            kernel::sleep(2500);
            let _ = kernel::pause(heartbeat);
            kernel::sleep(2500);
            let _ = kernel::resume(heartbeat);
        }
    }

    static mut MONITOR_STACK: [u32; 128] = [0; 128];

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    #[entry]
    fn main() -> ! {
        unsafe {
            HEAP.lock()
                .init(core::ptr::addr_of_mut!(HEAP_MEM) as *mut u8, HEAP_SIZE);
        }

        let mut cp = cortex_m::Peripherals::take().unwrap();
        cortex_m4::configure_systick(&mut cp.SYST);

        COUNTER_SEM.set(semaphore::create(1).expect("semaphore"));
        SAMPLES.set(queue::create(4, 4).expect("queue"));

        let heartbeat = kernel::create_thread(
            heartbeat_main,
            Priority::High,
            None,
            128,
            FpuMode::Off,
        )
        .expect("heartbeat");
        HEARTBEAT_TASK.set(heartbeat);

        kernel::create_thread(dsp_main, Priority::Medium, None, 128, FpuMode::On)
            .expect("dsp");
        kernel::create_thread(worker_main, Priority::Medium, None, 128, FpuMode::Off)
            .expect("worker a");
        kernel::create_thread(worker_main, Priority::Medium, None, 128, FpuMode::Off)
            .expect("worker b");
        kernel::create_thread(producer_main, Priority::Low, None, 128, FpuMode::Off)
            .expect("producer");
        kernel::create_thread(consumer_main, Priority::Medium, None, 128, FpuMode::Off)
            .expect("consumer");

        let monitor_stack: &'static mut [u32] =
            unsafe { &mut (*core::ptr::addr_of_mut!(MONITOR_STACK))[..] };
        kernel::create_thread(
            monitor_main,
            Priority::Low,
            Some(monitor_stack),
            0,
            FpuMode::Off,
        )
        .expect("monitor");

        // Hand the CPU to the kernel; preemption starts on the next tick.
        kernel::init(1)
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {}
