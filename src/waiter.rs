//! Completion cells for parked waiters.
//!
//! A [`WaitCell`] is the unit every queue in this crate parks: a
//! future-like cell that transitions exactly once from pending to a
//! terminal status, either `Activated` (the primitive handed the waiter
//! ownership) or `Cancelled` (the waiter's token fired first).
//!
//! The once-only transition is the crate's cancellation hand-off
//! mechanism: when activation and cancellation race, the compare-exchange
//! picks a single winner, and the loser re-enters the owning primitive's
//! critical section to restore state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::task::Waker;

use parking_lot::Mutex;

const PENDING: u8 = 0;
const ACTIVATED: u8 = 1;
const CANCELLED: u8 = 2;

/// Terminal status of a completed waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitStatus {
    /// The primitive handed this waiter ownership.
    Activated,
    /// The waiter's cancellation token fired first.
    Cancelled,
}

/// A one-shot completion cell with an attached waker slot.
#[derive(Debug)]
pub(crate) struct WaitCell {
    state: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl WaitCell {
    /// Creates a pending cell.
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            waker: Mutex::new(None),
        }
    }

    /// Creates a cell that is already activated.
    ///
    /// Used by the non-suspending `try_` acquisition paths, which insert a
    /// holder without ever parking.
    pub(crate) fn activated() -> Self {
        Self {
            state: AtomicU8::new(ACTIVATED),
            waker: Mutex::new(None),
        }
    }

    /// Attempts the unique pending-to-terminal transition.
    ///
    /// Returns `true` iff this call completed the cell; the registered
    /// waker, if any, is woken on success. Exactly one caller ever
    /// observes `true`.
    pub(crate) fn complete(&self, status: WaitStatus) -> bool {
        let next = match status {
            WaitStatus::Activated => ACTIVATED,
            WaitStatus::Cancelled => CANCELLED,
        };
        if self
            .state
            .compare_exchange(PENDING, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let waker = self.waker.lock().take();
            if let Some(waker) = waker {
                waker.wake();
            }
            true
        } else {
            false
        }
    }

    /// Returns the terminal status, or `None` while pending.
    pub(crate) fn status(&self) -> Option<WaitStatus> {
        match self.state.load(Ordering::Acquire) {
            PENDING => None,
            ACTIVATED => Some(WaitStatus::Activated),
            CANCELLED => Some(WaitStatus::Cancelled),
            other => unreachable!("corrupt wait cell state {other}"),
        }
    }

    /// Stores the waker to wake on completion.
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.waker.lock();
        let fresh = slot.as_ref().is_some_and(|existing| existing.will_wake(waker));
        if !fresh {
            *slot = Some(waker.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::task::Wake;
    use std::thread;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn completes_once() {
        let cell = WaitCell::new();
        assert_eq!(cell.status(), None);
        assert!(cell.complete(WaitStatus::Activated));
        assert!(!cell.complete(WaitStatus::Cancelled));
        assert_eq!(cell.status(), Some(WaitStatus::Activated));
    }

    #[test]
    fn pre_activated_cell_rejects_completion() {
        let cell = WaitCell::activated();
        assert_eq!(cell.status(), Some(WaitStatus::Activated));
        assert!(!cell.complete(WaitStatus::Cancelled));
    }

    #[test]
    fn completion_wakes_registered_waker() {
        let cell = WaitCell::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        cell.register(&waker);

        assert!(cell.complete(WaitStatus::Cancelled));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_completions_have_one_winner() {
        for _ in 0..100 {
            let cell = Arc::new(WaitCell::new());
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let activate = {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.complete(WaitStatus::Activated)
                })
            };
            let cancel = {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.complete(WaitStatus::Cancelled)
                })
            };

            let a = activate.join().expect("activate thread panicked");
            let c = cancel.join().expect("cancel thread panicked");
            assert!(a ^ c, "exactly one completion must win");
        }
    }
}
