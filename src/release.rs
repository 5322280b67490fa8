//! Idempotent release guards.
//!
//! [`ScopedRelease`] wraps a release action so that it runs at most once,
//! on any exit path. The at-most-once property is enforced by an embedded
//! [`OnceFlag`], so concurrent or repeated closes cannot double-release.
//!
//! The synchronous variant runs its action inline and must not suspend;
//! [`AsyncScopedRelease`] awaits an async action instead, but its drop
//! path can only discard the action (drop cannot await) — close it
//! explicitly.

use std::future::Future;

use crate::once_flag::OnceFlag;

/// A guard that runs a release action at most once.
///
/// # Example
///
/// ```
/// use fairsync::ScopedRelease;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// static RELEASES: AtomicUsize = AtomicUsize::new(0);
///
/// let mut guard = ScopedRelease::new(|| {
///     RELEASES.fetch_add(1, Ordering::SeqCst);
/// });
/// guard.close();
/// guard.close(); // no effect
/// drop(guard);   // no effect
/// assert_eq!(RELEASES.load(Ordering::SeqCst), 1);
/// ```
#[derive(Debug)]
pub struct ScopedRelease<F: FnOnce()> {
    closed: OnceFlag,
    action: Option<F>,
}

impl<F: FnOnce()> ScopedRelease<F> {
    /// Creates a guard around the given release action.
    #[must_use]
    pub fn new(action: F) -> Self {
        Self {
            closed: OnceFlag::new(),
            action: Some(action),
        }
    }

    /// Runs the release action if it has not run yet.
    pub fn close(&mut self) {
        if self.closed.try_set() {
            if let Some(action) = self.action.take() {
                action();
            }
        }
    }

    /// Returns true if the release action has run (or been claimed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}

impl<F: FnOnce()> Drop for ScopedRelease<F> {
    fn drop(&mut self) {
        self.close();
    }
}

/// A boxed release guard, for handles that erase their action type.
pub type BoxedRelease = ScopedRelease<Box<dyn FnOnce() + Send>>;

/// A guard that awaits an async release action at most once.
///
/// Unlike [`ScopedRelease`], dropping this guard without closing it
/// discards the action: drop cannot suspend. A discarded action is logged.
#[derive(Debug)]
pub struct AsyncScopedRelease<F, Fut>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    closed: OnceFlag,
    action: Option<F>,
}

impl<F, Fut> AsyncScopedRelease<F, Fut>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    /// Creates a guard around the given async release action.
    #[must_use]
    pub fn new(action: F) -> Self {
        Self {
            closed: OnceFlag::new(),
            action: Some(action),
        }
    }

    /// Awaits the release action if it has not run yet.
    pub async fn close(&mut self) {
        if self.closed.try_set() {
            if let Some(action) = self.action.take() {
                action().await;
            }
        }
    }

    /// Returns true if the release action has run (or been claimed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}

impl<F, Fut> Drop for AsyncScopedRelease<F, Fut>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    fn drop(&mut self) {
        if !self.closed.is_set() && self.action.is_some() {
            tracing::warn!("async release guard dropped without close; action discarded");
        }
    }
}
