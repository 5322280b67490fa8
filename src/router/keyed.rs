//! Keyed router: publishes reach only the subscriptions bound to the key.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use super::broadcast::settle;
use super::handler::{HandlerFuture, MessageHandler, PublishResult};
use super::subscription::{SubscriberEntry, Subscription, Unregister};
use super::{normalize_key, RouterError};
use crate::cancel::CancelToken;
use crate::mutex::Mutex;

const DROP_RELEASE_ATTEMPTS: usize = 64;

type KeyMap<M> = HashMap<String, Vec<SubscriberEntry<M>>>;

struct KeyedInner<M: 'static> {
    registry: Mutex<u64>,
    /// Copy-on-write map from normalized key to its subscriptions.
    subs: ArcSwap<KeyMap<M>>,
}

impl<M: 'static> KeyedInner<M> {
    /// Rebuilds the snapshot without `id`. Callers hold the registry.
    fn remove_entry(&self, id: u64) {
        let current = self.subs.load_full();
        let mut next = KeyMap::new();
        for (key, entries) in current.iter() {
            let kept: Vec<SubscriberEntry<M>> =
                entries.iter().filter(|e| e.id != id).cloned().collect();
            if !kept.is_empty() {
                next.insert(key.clone(), kept);
            }
        }
        self.subs.store(Arc::new(next));
    }
}

impl<M: Send + 'static> Unregister<M> for KeyedInner<M> {
    fn try_unregister(&self, id: u64) -> bool {
        for _ in 0..DROP_RELEASE_ATTEMPTS {
            if let Some(_guard) = self.registry.try_lock() {
                self.remove_entry(id);
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    fn unregister<'a>(
        &'a self,
        id: u64,
        cancel: &'a CancelToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), RouterError>> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self
                .registry
                .lock(cancel)
                .await
                .map_err(|_| RouterError::Cancelled)?;
            self.remove_entry(id);
            tracing::debug!(id, "handler unregistered");
            Ok(())
        })
    }
}

/// A router that dispatches a publish under key `k` only to the
/// subscriptions registered under `k` (case-insensitively).
///
/// See the [module docs](super) for the concurrency contract.
pub struct KeyedRouter<M: 'static> {
    inner: Arc<KeyedInner<M>>,
}

impl<M: 'static> std::fmt::Debug for KeyedRouter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRouter")
            .field("keys", &self.inner.subs.load().len())
            .finish_non_exhaustive()
    }
}

impl<M: 'static> Clone for KeyedRouter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: 'static> Default for KeyedRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> KeyedRouter<M> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(KeyedInner {
                registry: Mutex::new(0),
                subs: ArcSwap::from_pointee(KeyMap::new()),
            }),
        }
    }

    /// Number of live registrations across all keys.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.load().values().map(Vec::len).sum()
    }
}

impl<M: Send + 'static> KeyedRouter<M> {
    /// Registers a handler under a non-empty binding key.
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::EmptyKey`] for an empty key,
    /// [`RouterError::DuplicateHandler`] if the same handler is already
    /// bound to this key, or [`RouterError::Cancelled`] if the token
    /// fires while acquiring the registration mutex.
    pub async fn register_callback(
        &self,
        binding_key: &str,
        handler: Arc<dyn MessageHandler<M>>,
        cancel: &CancelToken,
    ) -> Result<Subscription<M>, RouterError> {
        if binding_key.is_empty() {
            return Err(RouterError::EmptyKey);
        }
        let normalized = normalize_key(binding_key);
        let mut next_id = self
            .inner
            .registry
            .lock(cancel)
            .await
            .map_err(|_| RouterError::Cancelled)?;

        let current = self.inner.subs.load_full();
        if current
            .get(&normalized)
            .is_some_and(|entries| entries.iter().any(|e| Arc::ptr_eq(&e.handler, &handler)))
        {
            return Err(RouterError::DuplicateHandler);
        }

        let id = *next_id;
        *next_id += 1;
        let mut next: KeyMap<M> = (*current).clone();
        next.entry(normalized.clone()).or_default().push(SubscriberEntry {
            id,
            key: normalized,
            handler,
        });
        self.inner.subs.store(Arc::new(next));
        tracing::debug!(id, key = binding_key, "handler registered");

        let inner_dyn: Arc<dyn Unregister<M>> = self.inner.clone();
        let weak: Weak<dyn Unregister<M>> = Arc::downgrade(&inner_dyn);
        Ok(Subscription::new(weak, id))
    }

    /// Publishes a message to the handlers bound to `key`.
    ///
    /// A key with no subscriptions yields a zero-receiver result.
    pub async fn publish_message(&self, key: &str, message: M) -> PublishResult {
        let normalized = normalize_key(key);
        let snapshot = self.inner.subs.load_full();
        let mut handlers: Vec<Arc<dyn MessageHandler<M>>> = Vec::new();
        if let Some(entries) = snapshot.get(&normalized) {
            for entry in entries {
                if !handlers.iter().any(|h| Arc::ptr_eq(h, &entry.handler)) {
                    handlers.push(Arc::clone(&entry.handler));
                }
            }
        }
        let futures: Vec<HandlerFuture> =
            handlers.iter().map(|h| h.handle(key, &message)).collect();
        settle(key, handlers.len(), futures).await
    }
}
