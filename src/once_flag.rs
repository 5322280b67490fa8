//! Lock-free one-shot latch.
//!
//! [`OnceFlag`] is a two-state value that can be flipped from unset to set
//! exactly once. Under any number of concurrent callers, exactly one
//! observes the transition. It backs every idempotent-release path in this
//! crate.

use std::sync::atomic::{AtomicBool, Ordering};

/// A monotonic one-shot flag.
///
/// The flag starts unset and can be set exactly once via [`try_set`].
/// It is never reset. The implementation is a single atomic word with a
/// compare-and-exchange; there is no allocation and no suspension.
///
/// [`try_set`]: OnceFlag::try_set
///
/// # Example
///
/// ```
/// use fairsync::OnceFlag;
///
/// let flag = OnceFlag::new();
/// assert!(flag.try_set());
/// assert!(!flag.try_set());
/// assert!(flag.is_set());
/// ```
#[derive(Debug, Default)]
pub struct OnceFlag {
    set: AtomicBool,
}

impl OnceFlag {
    /// Creates a new, unset flag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Returns true if the flag has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Attempts the unique unset-to-set transition.
    ///
    /// Returns `true` iff this call performed the transition, which happens
    /// exactly when the previous value was unset. All later calls return
    /// `false`.
    pub fn try_set(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
