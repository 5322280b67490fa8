//! Cooperative cancellation sources and tokens.
//!
//! Every suspending operation in this crate accepts a [`CancelToken`].
//! Triggering the owning [`CancelSource`] completes the operation with a
//! `Cancelled` error and restores primitive state (waiters are removed,
//! heads hand off).
//!
//! Timeouts are not first-class anywhere in fairsync: compose a source
//! with a delay via [`CancelSource::cancel_after`], or combine two tokens
//! with [`CancelToken::linked`].
//!
//! # Example
//!
//! ```
//! use fairsync::{CancelSource, CancelToken};
//!
//! let source = CancelSource::new();
//! let token = source.token();
//! assert!(!token.is_cancelled());
//! source.cancel();
//! assert!(token.is_cancelled());
//! assert!(token.checkpoint().is_err());
//!
//! // A token that never cancels, for callers that do not need one.
//! let never = CancelToken::never();
//! assert!(never.checkpoint().is_ok());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct WakerSet {
    next_id: u64,
    entries: HashMap<u64, Waker>,
}

#[derive(Debug)]
pub(crate) struct CancelInner {
    cancelled: AtomicBool,
    wakers: Mutex<WakerSet>,
}

impl CancelInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            wakers: Mutex::new(WakerSet::default()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let woken: Vec<Waker> = {
            let mut set = self.wakers.lock();
            set.entries.drain().map(|(_, w)| w).collect()
        };
        tracing::trace!(waiters = woken.len(), "cancellation requested");
        for waker in woken {
            waker.wake();
        }
    }

    fn insert(&self, waker: &Waker) -> u64 {
        let mut set = self.wakers.lock();
        let id = set.next_id;
        set.next_id = set.next_id.wrapping_add(1);
        set.entries.insert(id, waker.clone());
        id
    }

    fn update(&self, id: u64, waker: &Waker) {
        let mut set = self.wakers.lock();
        if let Some(slot) = set.entries.get_mut(&id) {
            if !slot.will_wake(waker) {
                *slot = waker.clone();
            }
        }
    }

    fn remove(&self, id: u64) {
        self.wakers.lock().entries.remove(&id);
    }
}

/// The triggering side of a cancellation pair.
///
/// Dropping the source without cancelling leaves its tokens permanently
/// un-cancelled.
#[derive(Debug)]
pub struct CancelSource {
    inner: Arc<CancelInner>,
}

impl CancelSource {
    /// Creates a new, untriggered source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner::new()),
        }
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            repr: TokenRepr::Live(Arc::clone(&self.inner)),
        }
    }

    /// Requests cancellation, waking every parked waiter that registered
    /// with a token of this source. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true if this source has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Arms a timer that cancels this source after `delay`.
    ///
    /// The timer holds only a weak reference: dropping the source lets the
    /// timer expire without effect. This is the composition point for
    /// timeout-like behavior; fairsync has no first-class timeouts.
    pub fn cancel_after(&self, delay: Duration) {
        let inner = Arc::downgrade(&self.inner);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if let Some(inner) = Weak::upgrade(&inner) {
                inner.cancel();
            }
        });
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
enum TokenRepr {
    /// Never cancels.
    Never,
    /// Observes one source.
    Live(Arc<CancelInner>),
    /// Cancelled when either constituent is.
    Linked(Arc<(CancelToken, CancelToken)>),
}

/// The observing side of a cancellation pair.
///
/// Tokens are cheap to clone and are handed into every suspending
/// operation in this crate.
#[derive(Debug, Clone)]
pub struct CancelToken {
    repr: TokenRepr,
}

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            repr: TokenRepr::Never,
        }
    }

    /// Combines two tokens; the result is cancelled when either is.
    #[must_use]
    pub fn linked(a: &Self, b: &Self) -> Self {
        Self {
            repr: TokenRepr::Linked(Arc::new((a.clone(), b.clone()))),
        }
    }

    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match &self.repr {
            TokenRepr::Never => false,
            TokenRepr::Live(inner) => inner.is_cancelled(),
            TokenRepr::Linked(pair) => pair.0.is_cancelled() || pair.1.is_cancelled(),
        }
    }

    /// Fails with a `Cancelled` error if cancellation has been requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    /// Registers a waker to be woken when cancellation is requested.
    ///
    /// Callers must re-check [`is_cancelled`](Self::is_cancelled) after
    /// registering: a cancel that fires between the check and the
    /// registration is only observable through the re-check.
    pub(crate) fn register(&self, waker: &Waker) -> CancelRegistration {
        let mut slots = Vec::new();
        self.collect_registrations(waker, &mut slots);
        CancelRegistration { slots }
    }

    fn collect_registrations(&self, waker: &Waker, slots: &mut Vec<(Arc<CancelInner>, u64)>) {
        match &self.repr {
            TokenRepr::Never => {}
            TokenRepr::Live(inner) => {
                let id = inner.insert(waker);
                slots.push((Arc::clone(inner), id));
            }
            TokenRepr::Linked(pair) => {
                pair.0.collect_registrations(waker, slots);
                pair.1.collect_registrations(waker, slots);
            }
        }
    }
}

/// A registration of one waker across the sources behind a token.
///
/// Dropping the registration removes the waker everywhere.
#[derive(Debug)]
pub(crate) struct CancelRegistration {
    slots: Vec<(Arc<CancelInner>, u64)>,
}

impl CancelRegistration {
    /// Replaces the registered waker if the task has migrated.
    pub(crate) fn update(&self, waker: &Waker) {
        for (inner, id) in &self.slots {
            inner.update(*id, waker);
        }
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        for (inner, id) in &self.slots {
            inner.remove(*id);
        }
    }
}
