//! FIFO-fair cancellable async mutexes.
//!
//! Three interchangeable implementations expose one contract and differ
//! only in how they protect their internal waiter FIFO:
//!
//! - [`Mutex`]: the FIFO behind an OS monitor ([`MonitorGate`]).
//! - [`SpinMutex`]: the FIFO behind a spin-CAS gate with escalating
//!   backoff ([`SpinGate`]).
//! - [`SemMutex`]: no FIFO of its own; waiter discipline is delegated to
//!   a single-permit [`Semaphore`].
//!
//! # Fairness
//!
//! Lock acquisition is strict FIFO among suspended acquirers, and
//! [`try_lock`](FifoMutex::try_lock) never barges: it fails whenever any
//! waiter is queued, even if the lock itself is mid-handoff.
//!
//! # Cancel Safety
//!
//! Cancellation while parked removes the waiter and fails with
//! [`LockError::Cancelled`]. A waiter that is activated concurrently with
//! cancellation resolves exactly one way: either the caller receives the
//! lock, or (if the future was dropped before observing activation) the
//! lock is handed to the next waiter. It is never lost and never
//! duplicated.
//!
//! # Example
//!
//! ```
//! use fairsync::{CancelToken, Mutex};
//! use fairsync::test_utils::block_on;
//!
//! let mutex = Mutex::new(41);
//! block_on(async {
//!     let cancel = CancelToken::never();
//!     let mut guard = mutex.lock(&cancel).await.unwrap();
//!     *guard += 1;
//! });
//! assert_eq!(mutex.into_inner(), 42);
//! ```

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex as PlMutex;
use thiserror::Error;

use crate::cancel::{CancelRegistration, CancelToken};
use crate::gate::{MonitorGate, QueueGate, SpinConfig, SpinGate};
use crate::semaphore::{Acquire, AcquireError, Semaphore};
use crate::waiter::{WaitCell, WaitStatus};

/// Error returned when mutex locking fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    /// Cancelled while waiting for the lock.
    #[error("mutex lock cancelled")]
    Cancelled,
}

/// A FIFO-fair async mutex, generic over its inner gate.
///
/// The mutex is *held* exactly when its FIFO is non-empty; the head
/// waiter is the holder. See the [module docs](self) for the contract
/// shared by all variants.
#[derive(Debug)]
pub struct FifoMutex<T, G: QueueGate = MonitorGate> {
    gate: G,
    data: PlMutex<T>,
}

/// FIFO mutex whose inner gate is an OS monitor.
pub type Mutex<T> = FifoMutex<T, MonitorGate>;

/// FIFO mutex whose inner gate is a spin-CAS loop with backoff.
pub type SpinMutex<T> = FifoMutex<T, SpinGate>;

impl<T, G: QueueGate> FifoMutex<T, G> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            gate: G::default(),
            data: PlMutex::new(value),
        }
    }

    /// Returns true if the mutex is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.gate.with(|q| !q.is_empty())
    }

    /// Returns the number of tasks parked behind the holder.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.gate.with(|q| q.len().saturating_sub(1))
    }

    /// Acquires the mutex, parking FIFO behind earlier acquirers.
    ///
    /// # Errors
    ///
    /// The returned future fails with [`LockError::Cancelled`] if the
    /// token fires before the lock is handed over.
    pub fn lock<'a>(&'a self, cancel: &'a CancelToken) -> Lock<'a, T, G> {
        Lock {
            mutex: self,
            cancel,
            cell: None,
            registration: None,
            finished: false,
        }
    }

    /// Attempts to acquire the mutex without parking.
    ///
    /// Returns `None` whenever the FIFO is non-empty: a `try_lock` never
    /// steals ahead of an existing waiter.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, G>> {
        let cell = self.gate.with(|q| {
            if q.is_empty() {
                let cell = Arc::new(WaitCell::activated());
                q.push_back(Arc::clone(&cell));
                Some(cell)
            } else {
                None
            }
        })?;
        Some(MutexGuard {
            mutex: self,
            cell,
            inner: Some(self.data.lock()),
        })
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: `&mut self` proves exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the underlying data.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Removes the holder and activates the next live waiter.
    fn unlock(&self, cell: &Arc<WaitCell>) {
        self.gate.with(|q| {
            let head = q.pop_front();
            debug_assert!(
                head.as_ref().is_some_and(|h| Arc::ptr_eq(h, cell)),
                "mutex released out of order"
            );
            while let Some(next) = q.front() {
                if next.complete(WaitStatus::Activated) {
                    break;
                }
                // The head lost a cancellation race and is on its way
                // out; hand the lock to the waiter behind it.
                q.pop_front();
            }
        });
    }

    fn remove_waiter(&self, cell: &Arc<WaitCell>) {
        self.gate.with(|q| q.remove(cell));
    }
}

impl<T> FifoMutex<T, SpinGate> {
    /// Creates a spin-gated mutex with a custom escalation schedule.
    #[must_use]
    pub fn with_spin_config(value: T, config: SpinConfig) -> Self {
        Self {
            gate: SpinGate::with_config(config),
            data: PlMutex::new(value),
        }
    }
}

impl<T: Default, G: QueueGate> Default for FifoMutex<T, G> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`FifoMutex::lock`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Lock<'a, T, G: QueueGate> {
    mutex: &'a FifoMutex<T, G>,
    cancel: &'a CancelToken,
    cell: Option<Arc<WaitCell>>,
    registration: Option<CancelRegistration>,
    finished: bool,
}

impl<'a, T, G: QueueGate> Future for Lock<'a, T, G> {
    type Output = Result<MutexGuard<'a, T, G>, LockError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        debug_assert!(!this.finished, "lock polled after completion");

        if this.cell.is_none() {
            if this.cancel.is_cancelled() {
                this.finished = true;
                return Poll::Ready(Err(LockError::Cancelled));
            }
            let cell = Arc::new(WaitCell::new());
            this.mutex.gate.with(|q| {
                q.push_back(Arc::clone(&cell));
                if q.len() == 1 {
                    // Sole waiter: the lock is ours before the gate drops.
                    cell.complete(WaitStatus::Activated);
                }
            });
            this.cell = Some(cell);
        }

        let cell = Arc::clone(this.cell.as_ref().expect("waiter cell present"));

        loop {
            match cell.status() {
                Some(WaitStatus::Activated) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Ok(MutexGuard {
                        mutex: this.mutex,
                        cell,
                        inner: Some(this.mutex.data.lock()),
                    }));
                }
                Some(WaitStatus::Cancelled) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(LockError::Cancelled));
                }
                None => {}
            }

            if this.cancel.is_cancelled() {
                if cell.complete(WaitStatus::Cancelled) {
                    this.mutex.remove_waiter(&cell);
                    this.finished = true;
                    this.registration = None;
                    tracing::trace!("mutex lock cancelled while parked");
                    return Poll::Ready(Err(LockError::Cancelled));
                }
                // Lost the race: the releaser activated us first. The
                // status check at the top of the loop takes the lock.
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

impl<T, G: QueueGate> Drop for Lock<'_, T, G> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(cell) = self.cell.take() else {
            return;
        };
        if cell.complete(WaitStatus::Cancelled) {
            self.mutex.remove_waiter(&cell);
        } else if cell.status() == Some(WaitStatus::Activated) {
            // Activated but never observed: hand the lock to the next
            // waiter instead of leaking it.
            self.mutex.unlock(&cell);
        }
    }
}

/// A guard that releases the mutex when dropped.
#[must_use = "guard will be immediately released if not held"]
pub struct MutexGuard<'a, T, G: QueueGate> {
    mutex: &'a FifoMutex<T, G>,
    cell: Arc<WaitCell>,
    inner: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<T: std::fmt::Debug, G: QueueGate> std::fmt::Debug for MutexGuard<'_, T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("data", &**self).finish()
    }
}

impl<T, G: QueueGate> Deref for MutexGuard<'_, T, G> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T, G: QueueGate> DerefMut for MutexGuard<'_, T, G> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T, G: QueueGate> Drop for MutexGuard<'_, T, G> {
    fn drop(&mut self) {
        // Free the data before activating a successor so the new holder
        // never blocks on the data lock.
        self.inner = None;
        self.mutex.unlock(&self.cell);
    }
}

/// Async mutex whose waiter discipline is a single-permit semaphore.
///
/// Exposes the same contract as [`Mutex`] and [`SpinMutex`]; fairness is
/// whatever the underlying [`Semaphore`] provides (strict FIFO).
#[derive(Debug)]
pub struct SemMutex<T> {
    sem: Semaphore,
    data: PlMutex<T>,
}

impl<T> SemMutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            sem: Semaphore::bounded(1, 1),
            data: PlMutex::new(value),
        }
    }

    /// Returns true if the mutex is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sem.available() == 0
    }

    /// Acquires the mutex, awaiting the semaphore permit.
    ///
    /// # Errors
    ///
    /// The returned future fails with [`LockError::Cancelled`] if the
    /// token fires before the permit is handed over.
    pub fn lock<'a>(&'a self, cancel: &'a CancelToken) -> SemLock<'a, T> {
        SemLock {
            mutex: self,
            acquire: self.sem.acquire(cancel),
        }
    }

    /// Attempts to acquire the mutex without parking.
    pub fn try_lock(&self) -> Option<SemMutexGuard<'_, T>> {
        if self.sem.try_acquire() {
            Some(SemMutexGuard {
                mutex: self,
                inner: Some(self.data.lock()),
            })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the underlying data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the underlying data.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SemMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`SemMutex::lock`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct SemLock<'a, T> {
    mutex: &'a SemMutex<T>,
    acquire: Acquire<'a>,
}

impl<'a, T> Future for SemLock<'a, T> {
    type Output = Result<SemMutexGuard<'a, T>, LockError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.acquire).poll(ctx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(SemMutexGuard {
                mutex: this.mutex,
                inner: Some(this.mutex.data.lock()),
            })),
            Poll::Ready(Err(AcquireError::Cancelled)) => Poll::Ready(Err(LockError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A guard that releases a [`SemMutex`] when dropped.
#[must_use = "guard will be immediately released if not held"]
pub struct SemMutexGuard<'a, T> {
    mutex: &'a SemMutex<T>,
    inner: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for SemMutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemMutexGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for SemMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> DerefMut for SemMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T> Drop for SemMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.mutex.sem.release();
    }
}
