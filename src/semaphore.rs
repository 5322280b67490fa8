//! FIFO counting semaphore.
//!
//! The semaphore is the crate's quota primitive: the bounded queue is two
//! of them over a backing collection, and the semaphore mutex variant is
//! one of them with a single permit.
//!
//! # Fairness
//!
//! Waiters are strictly FIFO. A released permit is handed directly to the
//! head waiter rather than returned to the pool, so a late
//! [`try_acquire`](Semaphore::try_acquire) can never barge past a parked
//! acquirer.
//!
//! # Cancel Safety
//!
//! Cancellation while parked removes the waiter and fails with
//! [`AcquireError::Cancelled`]. A permit handed to a waiter whose future
//! is dropped before observing it is released back, so no permit is ever
//! lost to a cancellation race.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;

use crate::cancel::{CancelRegistration, CancelToken};
use crate::waiter::{WaitCell, WaitStatus};

/// Error returned when a semaphore acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// Cancelled while waiting for a permit.
    #[error("semaphore acquire cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct SemState {
    /// Permits not currently held. Non-zero only while no waiter is parked.
    permits: usize,
    waiters: VecDeque<Arc<WaitCell>>,
}

/// A FIFO counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemState>,
    max: Option<usize>,
}

impl Semaphore {
    /// Creates a semaphore with the given number of permits and no upper
    /// bound on releases.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                permits,
                waiters: VecDeque::new(),
            }),
            max: None,
        }
    }

    /// Creates a semaphore whose permit count may never exceed `max`.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero or `permits` exceeds `max`; both indicate a
    /// construction bug in the caller.
    #[must_use]
    pub fn bounded(permits: usize, max: usize) -> Self {
        assert!(max > 0, "semaphore bound must be positive");
        assert!(permits <= max, "initial permits exceed semaphore bound");
        Self {
            state: Mutex::new(SemState {
                permits,
                waiters: VecDeque::new(),
            }),
            max: Some(max),
        }
    }

    /// Returns the number of permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }

    /// Returns the permit bound, if any.
    #[must_use]
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Acquires one permit, parking FIFO behind earlier acquirers.
    ///
    /// # Errors
    ///
    /// The returned future fails with [`AcquireError::Cancelled`] if the
    /// token fires before a permit is handed over.
    pub fn acquire<'a>(&'a self, cancel: &'a CancelToken) -> Acquire<'a> {
        Acquire {
            semaphore: self,
            cancel,
            cell: None,
            registration: None,
            finished: false,
        }
    }

    /// Attempts to take one permit without parking.
    ///
    /// Fails whenever no permit is free, including when permits are in
    /// flight to parked waiters.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 {
            debug_assert!(
                state.waiters.is_empty(),
                "permits available with parked waiters"
            );
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Returns one permit.
    ///
    /// The permit is handed directly to the head waiter if one is parked;
    /// otherwise it rejoins the pool.
    pub fn release(&self) {
        let mut state = self.state.lock();
        loop {
            match state.waiters.pop_front() {
                Some(cell) => {
                    if cell.complete(WaitStatus::Activated) {
                        return;
                    }
                    // The head lost a cancellation race and is on its way
                    // out; pass the permit to the next waiter.
                }
                None => {
                    state.permits += 1;
                    if let Some(max) = self.max {
                        debug_assert!(state.permits <= max, "semaphore released past its bound");
                    }
                    return;
                }
            }
        }
    }

    fn remove_waiter(&self, cell: &Arc<WaitCell>) {
        let mut state = self.state.lock();
        state.waiters.retain(|c| !Arc::ptr_eq(c, cell));
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// Future returned by [`Semaphore::acquire`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    cancel: &'a CancelToken,
    cell: Option<Arc<WaitCell>>,
    registration: Option<CancelRegistration>,
    finished: bool,
}

impl Future for Acquire<'_> {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        debug_assert!(!this.finished, "acquire polled after completion");

        if this.cell.is_none() {
            if this.cancel.is_cancelled() {
                this.finished = true;
                return Poll::Ready(Err(AcquireError::Cancelled));
            }
            let mut state = this.semaphore.state.lock();
            if state.permits > 0 {
                debug_assert!(
                    state.waiters.is_empty(),
                    "permits available with parked waiters"
                );
                state.permits -= 1;
                drop(state);
                this.finished = true;
                return Poll::Ready(Ok(()));
            }
            let cell = Arc::new(WaitCell::new());
            state.waiters.push_back(Arc::clone(&cell));
            drop(state);
            this.cell = Some(cell);
        }

        let cell = Arc::clone(this.cell.as_ref().expect("waiter cell present"));

        loop {
            match cell.status() {
                Some(WaitStatus::Activated) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Ok(()));
                }
                Some(WaitStatus::Cancelled) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                None => {}
            }

            if this.cancel.is_cancelled() {
                if cell.complete(WaitStatus::Cancelled) {
                    this.semaphore.remove_waiter(&cell);
                    this.finished = true;
                    this.registration = None;
                    tracing::trace!("semaphore acquire cancelled while parked");
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                // Lost the race: a release activated us first. The status
                // check at the top of the loop picks the permit up.
                continue;
            }

            cell.register(ctx.waker());
            match &this.registration {
                Some(reg) => reg.update(ctx.waker()),
                None => this.registration = Some(this.cancel.register(ctx.waker())),
            }
            // Re-check for completions that slipped in while registering.
            if cell.status().is_some() || this.cancel.is_cancelled() {
                continue;
            }
            return Poll::Pending;
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(cell) = self.cell.take() else {
            return;
        };
        if cell.complete(WaitStatus::Cancelled) {
            self.semaphore.remove_waiter(&cell);
        } else if cell.status() == Some(WaitStatus::Activated) {
            // Activated but never observed: hand the permit to the next
            // waiter instead of leaking it.
            self.semaphore.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::test_utils::{init_test_logging, poll_once};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn new_semaphore_has_correct_permits() {
        init_test("new_semaphore_has_correct_permits");
        let sem = Semaphore::new(5);
        crate::assert_with_log!(sem.available() == 5, "available", 5usize, sem.available());
        crate::assert_with_log!(sem.max().is_none(), "unbounded", true, sem.max().is_none());
        crate::test_complete!("new_semaphore_has_correct_permits");
    }

    #[test]
    fn acquire_decrements_permits() {
        init_test("acquire_decrements_permits");
        let cancel = CancelToken::never();
        let sem = Semaphore::new(2);

        let mut fut = sem.acquire(&cancel);
        poll_once(&mut fut)
            .expect("ready")
            .expect("acquire failed");
        crate::assert_with_log!(sem.available() == 1, "available", 1usize, sem.available());
        crate::test_complete!("acquire_decrements_permits");
    }

    #[test]
    fn contended_acquire_parks_fifo() {
        init_test("contended_acquire_parks_fifo");
        let cancel = CancelToken::never();
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());

        let mut first = sem.acquire(&cancel);
        let mut second = sem.acquire(&cancel);
        assert!(poll_once(&mut first).is_none());
        assert!(poll_once(&mut second).is_none());
        crate::assert_with_log!(sem.waiter_count() == 2, "parked", 2usize, sem.waiter_count());

        // One release must activate exactly the first waiter.
        sem.release();
        assert!(poll_once(&mut first).expect("ready").is_ok());
        assert!(poll_once(&mut second).is_none());

        sem.release();
        assert!(poll_once(&mut second).expect("ready").is_ok());
        crate::test_complete!("contended_acquire_parks_fifo");
    }

    #[test]
    fn try_acquire_never_barges() {
        init_test("try_acquire_never_barges");
        let cancel = CancelToken::never();
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());

        let mut parked = sem.acquire(&cancel);
        assert!(poll_once(&mut parked).is_none());

        // The released permit is in flight to the parked waiter; a try
        // must not steal it.
        sem.release();
        assert!(!sem.try_acquire());
        assert!(poll_once(&mut parked).expect("ready").is_ok());
        crate::test_complete!("try_acquire_never_barges");
    }

    #[test]
    fn cancel_removes_waiter() {
        init_test("cancel_removes_waiter");
        let source = CancelSource::new();
        let token = source.token();
        let sem = Semaphore::new(0);

        let mut fut = sem.acquire(&token);
        assert!(poll_once(&mut fut).is_none());
        crate::assert_with_log!(sem.waiter_count() == 1, "parked", 1usize, sem.waiter_count());

        source.cancel();
        let result = poll_once(&mut fut).expect("ready");
        assert_eq!(result, Err(AcquireError::Cancelled));
        crate::assert_with_log!(sem.waiter_count() == 0, "removed", 0usize, sem.waiter_count());
        crate::test_complete!("cancel_removes_waiter");
    }

    #[test]
    fn already_cancelled_token_fails_fast() {
        init_test("already_cancelled_token_fails_fast");
        let source = CancelSource::new();
        source.cancel();
        let token = source.token();
        let sem = Semaphore::new(1);

        let mut fut = sem.acquire(&token);
        let result = poll_once(&mut fut).expect("ready");
        assert_eq!(result, Err(AcquireError::Cancelled));
        crate::assert_with_log!(sem.available() == 1, "permit kept", 1usize, sem.available());
        crate::test_complete!("already_cancelled_token_fails_fast");
    }

    #[test]
    fn drop_removes_waiter() {
        init_test("drop_removes_waiter");
        let cancel = CancelToken::never();
        let sem = Semaphore::new(0);

        let mut fut = sem.acquire(&cancel);
        assert!(poll_once(&mut fut).is_none());
        drop(fut);
        crate::assert_with_log!(sem.waiter_count() == 0, "removed", 0usize, sem.waiter_count());
        crate::test_complete!("drop_removes_waiter");
    }

    #[test]
    fn activated_but_dropped_waiter_hands_off() {
        init_test("activated_but_dropped_waiter_hands_off");
        let cancel = CancelToken::never();
        let sem = Semaphore::new(0);

        let mut first = sem.acquire(&cancel);
        let mut second = sem.acquire(&cancel);
        assert!(poll_once(&mut first).is_none());
        assert!(poll_once(&mut second).is_none());

        // Activate the head, then drop its future without polling again:
        // the permit must flow to the second waiter.
        sem.release();
        drop(first);
        assert!(poll_once(&mut second).expect("ready").is_ok());
        crate::test_complete!("activated_but_dropped_waiter_hands_off");
    }

    #[test]
    fn release_returns_permit_when_idle() {
        init_test("release_returns_permit_when_idle");
        let sem = Semaphore::new(0);
        sem.release();
        crate::assert_with_log!(sem.available() == 1, "available", 1usize, sem.available());
        assert!(sem.try_acquire());
        crate::test_complete!("release_returns_permit_when_idle");
    }

    #[test]
    #[should_panic(expected = "initial permits exceed semaphore bound")]
    fn bounded_rejects_excess_permits() {
        let _ = Semaphore::bounded(4, 3);
    }
}
