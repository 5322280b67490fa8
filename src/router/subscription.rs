//! Subscription handles and the non-owning router back-edge.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use super::{MessageHandler, RouterError};
use crate::cancel::CancelToken;
use crate::once_flag::OnceFlag;

/// One registered `(binding key, handler)` pair.
pub(crate) struct SubscriberEntry<M: 'static> {
    pub(crate) id: u64,
    pub(crate) key: String,
    pub(crate) handler: Arc<dyn MessageHandler<M>>,
}

impl<M: 'static> Clone for SubscriberEntry<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<M: 'static> std::fmt::Debug for SubscriberEntry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Removal surface a subscription holds against its router.
pub(crate) trait Unregister<M>: Send + Sync {
    /// Best-effort synchronous removal; false if the registry was busy.
    fn try_unregister(&self, id: u64) -> bool;

    /// Removal through the registration mutex.
    fn unregister<'a>(
        &'a self,
        id: u64,
        cancel: &'a CancelToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), RouterError>> + Send + 'a>>;
}

/// Release handle for one registration.
///
/// The handle keeps only a weak back-reference to its router, so routers
/// can be reclaimed before their subscriptions are released; releasing
/// against a reclaimed router is a no-op. Release is idempotent.
///
/// Dropping the handle without releasing performs a best-effort
/// synchronous removal; correct programs release explicitly via
/// [`release`](Subscription::release).
pub struct Subscription<M: 'static> {
    router: Weak<dyn Unregister<M>>,
    id: u64,
    released: OnceFlag,
}

impl<M: 'static> std::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.released.is_set())
            .finish_non_exhaustive()
    }
}

impl<M: 'static> Subscription<M> {
    pub(crate) fn new(router: Weak<dyn Unregister<M>>, id: u64) -> Self {
        Self {
            router,
            id,
            released: OnceFlag::new(),
        }
    }

    /// Unregisters the handler from its router.
    ///
    /// Idempotent; a router that has already been dropped makes this a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::Cancelled`] if the token fires while
    /// acquiring the registration mutex; the subscription then remains
    /// live and can be released again.
    pub async fn release(&mut self, cancel: &CancelToken) -> Result<(), RouterError> {
        if self.released.is_set() {
            return Ok(());
        }
        if let Some(router) = self.router.upgrade() {
            router.unregister(self.id, cancel).await?;
        }
        let _ = self.released.try_set();
        Ok(())
    }

    /// Returns true if this subscription has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.is_set()
    }
}

impl<M: 'static> Drop for Subscription<M> {
    fn drop(&mut self) {
        if self.released.is_set() {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            // Finalization-time release is best-effort only.
            if !router.try_unregister(self.id) {
                tracing::warn!(
                    id = self.id,
                    "subscription dropped while registry was busy; release skipped"
                );
            }
        }
    }
}
