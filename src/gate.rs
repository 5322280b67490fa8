//! Inner gates: the short critical sections protecting waiter FIFOs.
//!
//! The mutex family differs only in its gate. [`MonitorGate`] takes an OS
//! monitor; [`SpinGate`] takes a compare-and-swap loop with count-driven
//! escalation (spin, then yield, then short sleeps of rising length) so
//! that contention on the gate never monopolises a worker. Both protect
//! the same [`WaitQueue`] and hold it only for non-suspending queue
//! surgery.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::waiter::WaitCell;

/// FIFO of parked lock waiters.
///
/// Opaque to callers; it only appears as the state protected by a gate.
#[derive(Debug, Default)]
pub struct WaitQueue {
    cells: VecDeque<Arc<WaitCell>>,
}

impl WaitQueue {
    pub(crate) fn push_back(&mut self, cell: Arc<WaitCell>) {
        self.cells.push_back(cell);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Arc<WaitCell>> {
        self.cells.pop_front()
    }

    pub(crate) fn front(&self) -> Option<&Arc<WaitCell>> {
        self.cells.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Removes a specific waiter by identity.
    pub(crate) fn remove(&mut self, cell: &Arc<WaitCell>) {
        self.cells.retain(|c| !Arc::ptr_eq(c, cell));
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::MonitorGate {}
    impl Sealed for super::SpinGate {}
}

/// A short critical section protecting a [`WaitQueue`].
///
/// This trait is sealed; the two implementations are [`MonitorGate`] and
/// [`SpinGate`].
pub trait QueueGate: sealed::Sealed + Send + Sync + Default {
    /// Runs `f` with exclusive access to the queue.
    ///
    /// `f` must not suspend; it performs queue surgery only.
    fn with<R>(&self, f: impl FnOnce(&mut WaitQueue) -> R) -> R;
}

/// Gate backed by an OS monitor.
#[derive(Debug, Default)]
pub struct MonitorGate {
    queue: Mutex<WaitQueue>,
}

impl QueueGate for MonitorGate {
    fn with<R>(&self, f: impl FnOnce(&mut WaitQueue) -> R) -> R {
        f(&mut self.queue.lock())
    }
}

/// Tuning for the spin gate's escalation schedule.
///
/// | Field | Default |
/// |-------|---------|
/// | `spin_limit` | 64 busy spins |
/// | `yield_limit` | 16 yields |
/// | `sleep_base` | 10 µs |
/// | `sleep_cap` | 1 ms |
///
/// On single-processor hosts the spin phase is skipped entirely: busy
/// spinning cannot make progress when the gate holder shares the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
    /// Busy-spin iterations before escalating to yields.
    pub spin_limit: u32,
    /// Scheduler yields before escalating to sleeps.
    pub yield_limit: u32,
    /// First sleep length; doubled on each further attempt.
    pub sleep_base: Duration,
    /// Upper bound on a single sleep.
    pub sleep_cap: Duration,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            spin_limit: 64,
            yield_limit: 16,
            sleep_base: Duration::from_micros(10),
            sleep_cap: Duration::from_millis(1),
        }
    }
}

impl SpinConfig {
    /// Normalizes configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.sleep_base.is_zero() {
            self.sleep_base = Duration::from_micros(1);
        }
        if self.sleep_cap < self.sleep_base {
            self.sleep_cap = self.sleep_base;
        }
    }
}

/// Gate backed by a compare-and-swap loop with escalating backoff.
#[derive(Debug)]
pub struct SpinGate {
    locked: AtomicBool,
    single_cpu: bool,
    config: SpinConfig,
    queue: UnsafeCell<WaitQueue>,
}

// SAFETY: `queue` is only reached through `with`, which holds the `locked`
// flag (acquire on entry, release on exit) for the duration of the access.
unsafe impl Sync for SpinGate {}

impl Default for SpinGate {
    fn default() -> Self {
        Self::with_config(SpinConfig::default())
    }
}

impl SpinGate {
    /// Creates a gate with the given escalation schedule.
    #[must_use]
    pub fn with_config(mut config: SpinConfig) -> Self {
        config.normalize();
        let single_cpu = std::thread::available_parallelism()
            .map(|n| n.get() == 1)
            .unwrap_or(false);
        Self {
            locked: AtomicBool::new(false),
            single_cpu,
            config,
            queue: UnsafeCell::new(WaitQueue::default()),
        }
    }

    fn backoff(&self, attempts: u32) {
        let spin_limit = if self.single_cpu {
            0
        } else {
            self.config.spin_limit
        };
        if attempts < spin_limit {
            std::hint::spin_loop();
        } else if attempts < spin_limit.saturating_add(self.config.yield_limit) {
            std::thread::yield_now();
        } else {
            let over = attempts - spin_limit.saturating_add(self.config.yield_limit);
            let doublings = over.min(6);
            let sleep = self
                .config
                .sleep_base
                .saturating_mul(1 << doublings)
                .min(self.config.sleep_cap);
            std::thread::sleep(sleep);
        }
    }
}

struct UnlockOnDrop<'a>(&'a AtomicBool);

impl Drop for UnlockOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueueGate for SpinGate {
    fn with<R>(&self, f: impl FnOnce(&mut WaitQueue) -> R) -> R {
        let mut attempts: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.backoff(attempts);
            attempts = attempts.saturating_add(1);
        }
        let _unlock = UnlockOnDrop(&self.locked);
        // SAFETY: the CAS above granted exclusive access; it lasts until
        // `_unlock` releases the flag, including on unwind.
        f(unsafe { &mut *self.queue.get() })
    }
}
