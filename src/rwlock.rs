//! Writer-preferring cancellable async read-write lock.
//!
//! One state machine governs every operation: a tagged phase plus three
//! waiter lists, mutated only under a single internal critical section.
//!
//! | Phase | `reading` | `pending_writers` | `pending_readers` |
//! |---|---|---|---|
//! | Idle | empty | empty | empty |
//! | Reading | non-empty | empty | empty |
//! | PendingWrite | non-empty | non-empty | any |
//! | Writing | empty | non-empty (head holds) | any |
//!
//! # Fairness
//!
//! Writer-preferring: once a writer is queued, later readers park behind
//! it, and the writer is activated as soon as the active readers drain.
//! When every queued writer disappears — release or cancellation — the
//! parked readers are batch-activated. That merge is the reason the
//! PendingWrite phase exists: a waiting writer being cancelled must not
//! strand the readers that arrived after it.
//!
//! # Cancel Safety
//!
//! Cancellation removes the waiter under the same critical section as any
//! other transition; a cancelled head writer hands off exactly like a
//! released one. Phase-invariant violations are bugs and abort.
//!
//! # Example
//!
//! ```
//! use fairsync::{CancelToken, RwLock};
//! use fairsync::test_utils::block_on;
//!
//! let lock = RwLock::new(vec![1, 2, 3]);
//! block_on(async {
//!     let cancel = CancelToken::never();
//!     let r1 = lock.read(&cancel).await.unwrap();
//!     let r2 = lock.read(&cancel).await.unwrap(); // readers share
//!     assert_eq!(r1.len() + r2.len(), 6);
//!     drop((r1, r2));
//!     let mut w = lock.write(&cancel).await.unwrap();
//!     w.push(4);
//! });
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::{Mutex as PlMutex, RwLock as PlRwLock};
use thiserror::Error;

use crate::cancel::{CancelRegistration, CancelToken};
use crate::waiter::{WaitCell, WaitStatus};

/// Error returned when acquiring a read or write lock fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RwLockError {
    /// Cancelled while waiting.
    #[error("rwlock acquisition cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Reading,
    PendingWrite,
    Writing,
}

#[derive(Debug)]
struct RwState {
    phase: Phase,
    /// Currently-active readers. Every cell here is activated.
    reading: Vec<Arc<WaitCell>>,
    /// Readers parked behind a queued writer.
    pending_readers: VecDeque<Arc<WaitCell>>,
    /// Queued writers; during Writing the head is the active writer.
    pending_writers: VecDeque<Arc<WaitCell>>,
}

/// A writer-preferring cancellable read-write lock.
#[derive(Debug)]
pub struct RwLock<T> {
    state: PlMutex<RwState>,
    data: PlRwLock<T>,
}

impl<T> RwLock<T> {
    /// Creates a new lock containing the given value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            state: PlMutex::new(RwState {
                phase: Phase::Idle,
                reading: Vec::new(),
                pending_readers: VecDeque::new(),
                pending_writers: VecDeque::new(),
            }),
            data: PlRwLock::new(value),
        }
    }

    /// Acquires a read guard, parking if a writer holds or is queued.
    ///
    /// # Errors
    ///
    /// The returned future fails with [`RwLockError::Cancelled`] if the
    /// token fires while parked.
    pub fn read<'a>(&'a self, cancel: &'a CancelToken) -> Read<'a, T> {
        Read {
            lock: self,
            cancel,
            cell: None,
            registration: None,
            finished: false,
        }
    }

    /// Acquires a write guard, parking behind active readers and queued
    /// writers.
    ///
    /// # Errors
    ///
    /// The returned future fails with [`RwLockError::Cancelled`] if the
    /// token fires while parked.
    pub fn write<'a>(&'a self, cancel: &'a CancelToken) -> Write<'a, T> {
        Write {
            lock: self,
            cancel,
            cell: None,
            registration: None,
            finished: false,
        }
    }

    /// Attempts to acquire a read guard without parking.
    ///
    /// Succeeds only in the Idle and Reading phases: a queued writer
    /// blocks new readers.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let cell = {
            let mut s = self.state.lock();
            match s.phase {
                Phase::Idle | Phase::Reading => {
                    let cell = Arc::new(WaitCell::activated());
                    s.reading.push(Arc::clone(&cell));
                    s.phase = Phase::Reading;
                    cell
                }
                Phase::PendingWrite | Phase::Writing => return None,
            }
        };
        Some(RwLockReadGuard {
            lock: self,
            cell,
            inner: Some(self.data.read()),
        })
    }

    /// Attempts to acquire a write guard without parking.
    ///
    /// Succeeds only in the Idle phase.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let cell = {
            let mut s = self.state.lock();
            match s.phase {
                Phase::Idle => {
                    let cell = Arc::new(WaitCell::activated());
                    s.pending_writers.push_back(Arc::clone(&cell));
                    s.phase = Phase::Writing;
                    cell
                }
                _ => return None,
            }
        };
        Some(RwLockWriteGuard {
            lock: self,
            cell,
            inner: Some(self.data.write()),
        })
    }

    /// Returns a mutable reference to the inner value.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock and returns the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn enqueue_reader(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        match s.phase {
            Phase::Idle => {
                s.reading.push(Arc::clone(cell));
                cell.complete(WaitStatus::Activated);
                s.phase = Phase::Reading;
            }
            Phase::Reading => {
                s.reading.push(Arc::clone(cell));
                cell.complete(WaitStatus::Activated);
            }
            Phase::PendingWrite | Phase::Writing => {
                s.pending_readers.push_back(Arc::clone(cell));
            }
        }
    }

    fn enqueue_writer(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        s.pending_writers.push_back(Arc::clone(cell));
        match s.phase {
            Phase::Idle => {
                cell.complete(WaitStatus::Activated);
                s.phase = Phase::Writing;
            }
            Phase::Reading => {
                s.phase = Phase::PendingWrite;
            }
            Phase::PendingWrite | Phase::Writing => {}
        }
    }

    fn release_read(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        let Some(pos) = s.reading.iter().position(|c| Arc::ptr_eq(c, cell)) else {
            unreachable!("releasing reader not in the active set")
        };
        s.reading.swap_remove(pos);
        if !s.reading.is_empty() {
            return;
        }
        match s.phase {
            Phase::Reading => s.phase = Phase::Idle,
            Phase::PendingWrite => Self::promote(&mut s),
            Phase::Idle | Phase::Writing => {
                unreachable!("phase invariant violated: active readers in {:?}", s.phase)
            }
        }
    }

    fn release_write(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        debug_assert_eq!(s.phase, Phase::Writing, "writer released outside Writing");
        let head = s.pending_writers.pop_front();
        debug_assert!(
            head.as_ref().is_some_and(|h| Arc::ptr_eq(h, cell)),
            "writer released out of order"
        );
        Self::promote(&mut s);
    }

    /// Hands the lock onward after the writer slot drains: the next live
    /// writer if any, otherwise every parked reader at once.
    fn promote(s: &mut RwState) {
        while let Some(w) = s.pending_writers.front() {
            if w.complete(WaitStatus::Activated) {
                s.phase = Phase::Writing;
                return;
            }
            // Cancelled while parked; skip past it.
            s.pending_writers.pop_front();
        }
        while let Some(r) = s.pending_readers.pop_front() {
            if r.complete(WaitStatus::Activated) {
                s.reading.push(r);
            }
        }
        s.phase = if s.reading.is_empty() {
            Phase::Idle
        } else {
            Phase::Reading
        };
    }

    fn cancel_reader(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        if let Some(pos) = s.pending_readers.iter().position(|c| Arc::ptr_eq(c, cell)) {
            s.pending_readers.remove(pos);
        }
        // Parked readers never gate a transition; nothing else moves.
    }

    fn cancel_writer(&self, cell: &Arc<WaitCell>) {
        let mut s = self.state.lock();
        let Some(pos) = s.pending_writers.iter().position(|c| Arc::ptr_eq(c, cell)) else {
            // Already skipped past by a promote walk.
            return;
        };
        s.pending_writers.remove(pos);
        if s.phase == Phase::PendingWrite && s.pending_writers.is_empty() {
            // The writer that parked those readers is gone: merge them
            // into the active set so none are stranded.
            let mut merged = 0usize;
            while let Some(r) = s.pending_readers.pop_front() {
                if r.complete(WaitStatus::Activated) {
                    s.reading.push(r);
                    merged += 1;
                }
            }
            debug_assert!(!s.reading.is_empty(), "PendingWrite with no active readers");
            s.phase = Phase::Reading;
            tracing::debug!(merged, "last queued writer cancelled; pending readers merged");
        }
    }

    #[cfg(test)]
    fn debug_phase(&self) -> Phase {
        self.state.lock().phase
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`RwLock::read`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Read<'a, T> {
    lock: &'a RwLock<T>,
    cancel: &'a CancelToken,
    cell: Option<Arc<WaitCell>>,
    registration: Option<CancelRegistration>,
    finished: bool,
}

impl<'a, T> Future for Read<'a, T> {
    type Output = Result<RwLockReadGuard<'a, T>, RwLockError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        debug_assert!(!this.finished, "read polled after completion");

        if this.cell.is_none() {
            if this.cancel.is_cancelled() {
                this.finished = true;
                return Poll::Ready(Err(RwLockError::Cancelled));
            }
            let cell = Arc::new(WaitCell::new());
            this.lock.enqueue_reader(&cell);
            this.cell = Some(cell);
        }

        let cell = Arc::clone(this.cell.as_ref().expect("waiter cell present"));

        loop {
            match cell.status() {
                Some(WaitStatus::Activated) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Ok(RwLockReadGuard {
                        lock: this.lock,
                        cell,
                        inner: Some(this.lock.data.read()),
                    }));
                }
                Some(WaitStatus::Cancelled) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(RwLockError::Cancelled));
                }
                None => {}
            }

            if this.cancel.is_cancelled() {
                if cell.complete(WaitStatus::Cancelled) {
                    this.lock.cancel_reader(&cell);
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(RwLockError::Cancelled));
                }
                continue;
            }

            cell.register(ctx.waker());
            match &this.registration {
                Some(reg) => reg.update(ctx.waker()),
                None => this.registration = Some(this.cancel.register(ctx.waker())),
            }
            if cell.status().is_some() || this.cancel.is_cancelled() {
                continue;
            }
            return Poll::Pending;
        }
    }
}

impl<T> Drop for Read<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(cell) = self.cell.take() else {
            return;
        };
        if cell.complete(WaitStatus::Cancelled) {
            self.lock.cancel_reader(&cell);
        } else if cell.status() == Some(WaitStatus::Activated) {
            // Activated but never observed: release as if a guard dropped.
            self.lock.release_read(&cell);
        }
    }
}

/// Future returned by [`RwLock::write`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Write<'a, T> {
    lock: &'a RwLock<T>,
    cancel: &'a CancelToken,
    cell: Option<Arc<WaitCell>>,
    registration: Option<CancelRegistration>,
    finished: bool,
}

impl<'a, T> Future for Write<'a, T> {
    type Output = Result<RwLockWriteGuard<'a, T>, RwLockError>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        debug_assert!(!this.finished, "write polled after completion");

        if this.cell.is_none() {
            if this.cancel.is_cancelled() {
                this.finished = true;
                return Poll::Ready(Err(RwLockError::Cancelled));
            }
            let cell = Arc::new(WaitCell::new());
            this.lock.enqueue_writer(&cell);
            this.cell = Some(cell);
        }

        let cell = Arc::clone(this.cell.as_ref().expect("waiter cell present"));

        loop {
            match cell.status() {
                Some(WaitStatus::Activated) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Ok(RwLockWriteGuard {
                        lock: this.lock,
                        cell,
                        inner: Some(this.lock.data.write()),
                    }));
                }
                Some(WaitStatus::Cancelled) => {
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(RwLockError::Cancelled));
                }
                None => {}
            }

            if this.cancel.is_cancelled() {
                if cell.complete(WaitStatus::Cancelled) {
                    this.lock.cancel_writer(&cell);
                    this.finished = true;
                    this.registration = None;
                    return Poll::Ready(Err(RwLockError::Cancelled));
                }
                continue;
            }

            cell.register(ctx.waker());
            match &this.registration {
                Some(reg) => reg.update(ctx.waker()),
                None => this.registration = Some(this.cancel.register(ctx.waker())),
            }
            if cell.status().is_some() || this.cancel.is_cancelled() {
                continue;
            }
            return Poll::Pending;
        }
    }
}

impl<T> Drop for Write<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(cell) = self.cell.take() else {
            return;
        };
        if cell.complete(WaitStatus::Cancelled) {
            self.lock.cancel_writer(&cell);
        } else if cell.status() == Some(WaitStatus::Activated) {
            // A cancelled head writer hands off exactly like a released
            // one.
            self.lock.release_write(&cell);
        }
    }
}

/// Guard for a read lock.
#[must_use = "guard will be immediately released if not held"]
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    cell: Arc<WaitCell>,
    inner: Option<parking_lot::RwLockReadGuard<'a, T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLockReadGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.lock.release_read(&self.cell);
    }
}

/// Guard for a write lock.
#[must_use = "guard will be immediately released if not held"]
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    cell: Arc<WaitCell>,
    inner: Option<parking_lot::RwLockWriteGuard<'a, T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLockWriteGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner.as_ref().expect("guard accessed after release")
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("guard accessed after release")
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.inner = None;
        self.lock.release_write(&self.cell);
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
    fn readers_share_the_lock() {
        init_test("readers_share_the_lock");
        let cancel = CancelToken::never();
        let lock = RwLock::new(42u32);

        let mut futures: Vec<_> = (0..5).map(|_| lock.read(&cancel)).collect();
        let guards: Vec<_> = futures
            .iter_mut()
            .map(|f| poll_once(f).expect("ready").expect("read failed"))
            .collect();
        assert_eq!(guards.len(), 5);
        assert!(guards.iter().all(|g| **g == 42));
        assert_eq!(lock.debug_phase(), Phase::Reading);

        drop(guards);
        assert_eq!(lock.debug_phase(), Phase::Idle);
        crate::test_complete!("readers_share_the_lock");
    }

    #[test]
    fn writer_excludes_everyone() {
        init_test("writer_excludes_everyone");
        let cancel = CancelToken::never();
        let lock = RwLock::new(5u32);

        let mut wfut = lock.write(&cancel);
        let mut w = poll_once(&mut wfut).expect("ready").expect("write failed");
        *w = 7;
        assert_eq!(lock.debug_phase(), Phase::Writing);

        assert!(lock.try_read().is_none());
        assert!(lock.try_write().is_none());

        drop(w);
        assert_eq!(lock.debug_phase(), Phase::Idle);
        let r = lock.try_read().expect("idle again");
        assert_eq!(*r, 7);
        crate::test_complete!("writer_excludes_everyone");
    }

    #[test]
    fn writer_waits_for_readers_to_drain() {
        init_test("writer_waits_for_readers_to_drain");
        let cancel = CancelToken::never();
        let lock = RwLock::new(());

        let r1 = lock.try_read().expect("idle");
        let r2 = lock.try_read().expect("reading");

        let mut wfut = lock.write(&cancel);
        assert!(poll_once(&mut wfut).is_none());
        assert_eq!(lock.debug_phase(), Phase::PendingWrite);

        drop(r1);
        assert!(poll_once(&mut wfut).is_none());
        drop(r2);
        let _w = poll_once(&mut wfut)
            .expect("ready after readers drained")
            .expect("write failed");
        assert_eq!(lock.debug_phase(), Phase::Writing);
        crate::test_complete!("writer_waits_for_readers_to_drain");
    }

    #[test]
    fn queued_writer_parks_new_readers() {
        init_test("queued_writer_parks_new_readers");
        let cancel = CancelToken::never();
        let lock = RwLock::new(());

        let r1 = lock.try_read().expect("idle");
        let mut wfut = lock.write(&cancel);
        assert!(poll_once(&mut wfut).is_none());

        // A reader arriving behind the queued writer parks, and try_read
        // refuses.
        let mut rfut = lock.read(&cancel);
        assert!(poll_once(&mut rfut).is_none());
        assert!(lock.try_read().is_none());

        // Writer goes first once the active reader drains.
        drop(r1);
        let w = poll_once(&mut wfut).expect("writer ready").expect("write failed");
        assert!(poll_once(&mut rfut).is_none());

        // After the writer, the parked reader is batch-activated.
        drop(w);
        let _r = poll_once(&mut rfut)
            .expect("reader ready after writer")
            .expect("read failed");
        assert_eq!(lock.debug_phase(), Phase::Reading);
        crate::test_complete!("queued_writer_parks_new_readers");
    }

    #[test]
    fn writer_release_activates_all_parked_readers() {
        init_test("writer_release_activates_all_parked_readers");
        let cancel = CancelToken::never();
        let lock = RwLock::new(());

        let mut wfut = lock.write(&cancel);
        let w = poll_once(&mut wfut).expect("ready").expect("write failed");

        let mut ra = lock.read(&cancel);
        let mut rb = lock.read(&cancel);
        assert!(poll_once(&mut ra).is_none());
        assert!(poll_once(&mut rb).is_none());

        drop(w);
        let _ga = poll_once(&mut ra).expect("a ready").expect("a failed");
        let _gb = poll_once(&mut rb).expect("b ready").expect("b failed");
        assert_eq!(lock.debug_phase(), Phase::Reading);
        crate::test_complete!("writer_release_activates_all_parked_readers");
    }

    #[test]
    fn writers_queue_fifo() {
        init_test("writers_queue_fifo");
        let cancel = CancelToken::never();
        let lock = RwLock::new(0u32);

        let mut w1 = lock.write(&cancel);
        let g1 = poll_once(&mut w1).expect("ready").expect("write failed");
        let mut w2 = lock.write(&cancel);
        let mut w3 = lock.write(&cancel);
        assert!(poll_once(&mut w2).is_none());
        assert!(poll_once(&mut w3).is_none());

        drop(g1);
        assert!(poll_once(&mut w3).is_none());
        let g2 = poll_once(&mut w2).expect("w2 ready").expect("w2 failed");
        drop(g2);
        let _g3 = poll_once(&mut w3).expect("w3 ready").expect("w3 failed");
        crate::test_complete!("writers_queue_fifo");
    }

    #[test]
    fn cancelled_last_writer_merges_pending_readers() {
        init_test("cancelled_last_writer_merges_pending_readers");
        let source = CancelSource::new();
        let never = CancelToken::never();
        let lock = RwLock::new(());

        let _active = lock.try_read().expect("idle");

        let wtoken = source.token();
        let mut wfut = lock.write(&wtoken);
        assert!(poll_once(&mut wfut).is_none());
        assert_eq!(lock.debug_phase(), Phase::PendingWrite);

        let mut rfut = lock.read(&never);
        assert!(poll_once(&mut rfut).is_none());

        // Cancelling the only queued writer must not strand the parked
        // reader: it is batch-merged into the active set.
        source.cancel();
        let result = poll_once(&mut wfut).expect("writer ready");
        assert_eq!(result.err(), Some(RwLockError::Cancelled));

        let _r = poll_once(&mut rfut)
            .expect("reader ready after writer cancelled")
            .expect("read failed");
        assert_eq!(lock.debug_phase(), Phase::Reading);
        crate::test_complete!("cancelled_last_writer_merges_pending_readers");
    }

    #[test]
    fn cancel_during_read_wait() {
        init_test("cancel_during_read_wait");
        let source = CancelSource::new();
        let lock = RwLock::new(());

        let w = lock.try_write().expect("idle");
        let token = source.token();
        let mut rfut = lock.read(&token);
        assert!(poll_once(&mut rfut).is_none());

        source.cancel();
        let result = poll_once(&mut rfut).expect("ready");
        assert_eq!(result.err(), Some(RwLockError::Cancelled));

        drop(w);
        assert_eq!(lock.debug_phase(), Phase::Idle);
        crate::test_complete!("cancel_during_read_wait");
    }

    #[test]
    fn already_cancelled_token_fails_fast() {
        init_test("already_cancelled_token_fails_fast");
        let source = CancelSource::new();
        source.cancel();
        let lock = RwLock::new(());

        let token = source.token();
        let mut rfut = lock.read(&token);
        assert_eq!(
            poll_once(&mut rfut).expect("ready").err(),
            Some(RwLockError::Cancelled)
        );
        let mut wfut = lock.write(&token);
        assert_eq!(
            poll_once(&mut wfut).expect("ready").err(),
            Some(RwLockError::Cancelled)
        );
        assert_eq!(lock.debug_phase(), Phase::Idle);
        crate::test_complete!("already_cancelled_token_fails_fast");
    }

    #[test]
    fn activated_but_dropped_writer_hands_off() {
        init_test("activated_but_dropped_writer_hands_off");
        let cancel = CancelToken::never();
        let lock = RwLock::new(());

        let r = lock.try_read().expect("idle");
        let mut w1 = lock.write(&cancel);
        let mut w2 = lock.write(&cancel);
        assert!(poll_once(&mut w1).is_none());
        assert!(poll_once(&mut w2).is_none());

        // Activate the head writer, then drop its future unobserved.
        drop(r);
        drop(w1);
        let _g = poll_once(&mut w2)
            .expect("second writer ready")
            .expect("write failed");
        assert_eq!(lock.debug_phase(), Phase::Writing);
        crate::test_complete!("activated_but_dropped_writer_hands_off");
    }

    #[test]
    fn try_write_fails_while_reading() {
        init_test("try_write_fails_while_reading");
        let lock = RwLock::new(());
        let _r = lock.try_read().expect("idle");
        assert!(lock.try_write().is_none());
        crate::test_complete!("try_write_fails_while_reading");
    }

    #[test]
    fn mutation_through_write_guard_is_visible() {
        init_test("mutation_through_write_guard_is_visible");
        let lock = RwLock::new(vec![1u32]);
        {
            let mut w = lock.try_write().expect("idle");
            w.push(2);
        }
        let r = lock.try_read().expect("idle");
        assert_eq!(*r, vec![1, 2]);
        crate::test_complete!("mutation_through_write_guard_is_visible");
    }
}
