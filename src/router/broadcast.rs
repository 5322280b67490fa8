//! Broadcast router: every publish reaches every registered handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use super::handler::{AggregateError, HandlerFailure, HandlerFuture, MessageHandler, PublishResult};
use super::join::join_handlers;
use super::subscription::{SubscriberEntry, Subscription, Unregister};
use super::{normalize_key, RouterError};
use crate::cancel::CancelToken;
use crate::mutex::Mutex;

/// Bounded try-lock passes used by drop-time unregistration. The
/// registration critical section never suspends, so a handful of
/// attempts is effectively always enough.
const DROP_RELEASE_ATTEMPTS: usize = 64;

struct BroadcastInner<M: 'static> {
    /// Serializes registration and unregistration. Holds the next
    /// subscription id.
    registry: Mutex<u64>,
    /// Copy-on-write subscriber snapshot; the publish path reads it
    /// atomically and never locks.
    subs: ArcSwap<Vec<SubscriberEntry<M>>>,
}

impl<M: 'static> BroadcastInner<M> {
    /// Rebuilds the snapshot without `id`. Callers hold the registry.
    fn remove_entry(&self, id: u64) {
        let current = self.subs.load_full();
        let next: Vec<SubscriberEntry<M>> =
            current.iter().filter(|e| e.id != id).cloned().collect();
        self.subs.store(Arc::new(next));
    }
}

impl<M: Send + 'static> Unregister<M> for BroadcastInner<M> {
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

/// A router that dispatches every published message to all distinct
/// registered handlers, regardless of publish key.
///
/// See the [module docs](super) for the concurrency contract.
pub struct BroadcastRouter<M: 'static> {
    inner: Arc<BroadcastInner<M>>,
}

impl<M: 'static> std::fmt::Debug for BroadcastRouter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRouter")
            .field("subscriptions", &self.inner.subs.load().len())
            .finish_non_exhaustive()
    }
}

impl<M: 'static> Clone for BroadcastRouter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: 'static> Default for BroadcastRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> BroadcastRouter<M> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BroadcastInner {
                registry: Mutex::new(0),
                subs: ArcSwap::from_pointee(Vec::new()),
            }),
        }
    }

    /// Number of live registrations.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.load().len()
    }
}

impl<M: Send + 'static> BroadcastRouter<M> {
    /// Registers a handler under a binding key.
    ///
    /// Duplicate binding keys are allowed for different handlers; the
    /// same handler (by `Arc` identity) under an existing binding key is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::DuplicateHandler`] on an identity
    /// duplicate, or [`RouterError::Cancelled`] if the token fires while
    /// acquiring the registration mutex.
    pub async fn register_callback(
        &self,
        binding_key: &str,
        handler: Arc<dyn MessageHandler<M>>,
        cancel: &CancelToken,
    ) -> Result<Subscription<M>, RouterError> {
        let normalized = normalize_key(binding_key);
        let mut next_id = self
            .inner
            .registry
            .lock(cancel)
            .await
            .map_err(|_| RouterError::Cancelled)?;

        let current = self.inner.subs.load_full();
        if current
            .iter()
            .any(|e| e.key == normalized && Arc::ptr_eq(&e.handler, &handler))
        {
            return Err(RouterError::DuplicateHandler);
        }

        let id = *next_id;
        *next_id += 1;
        let mut next = (*current).clone();
        next.push(SubscriberEntry {
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

    /// Publishes a message to every distinct handler.
    ///
    /// Handlers registered more than once (under different keys) are
    /// invoked once. All handlers run concurrently; their failures are
    /// aggregated in the result.
    pub async fn publish_message(&self, key: &str, message: M) -> PublishResult {
        let snapshot = self.inner.subs.load_full();
        let mut handlers: Vec<Arc<dyn MessageHandler<M>>> = Vec::new();
        for entry in snapshot.iter() {
            if !handlers.iter().any(|h| Arc::ptr_eq(h, &entry.handler)) {
                handlers.push(Arc::clone(&entry.handler));
            }
        }
        let futures: Vec<HandlerFuture> =
            handlers.iter().map(|h| h.handle(key, &message)).collect();
        settle(key, handlers.len(), futures).await
    }
}

/// Drives the dispatched handler futures and folds failures into the
/// result.
pub(crate) async fn settle(
    key: &str,
    receiver_count: usize,
    futures: Vec<HandlerFuture>,
) -> PublishResult {
    let results = join_handlers(futures).await;
    let failures: Vec<HandlerFailure> = results.into_iter().filter_map(Result::err).collect();
    tracing::debug!(
        key,
        receivers = receiver_count,
        failed = failures.len(),
        "publish dispatched"
    );
    PublishResult {
        receiver_count,
        error: if failures.is_empty() {
            None
        } else {
            Some(AggregateError { failures })
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::handler_fn;
    use crate::test_utils::{block_on, init_test_logging};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn counting_handler(count: Arc<AtomicUsize>) -> Arc<dyn MessageHandler<u32>> {
        Arc::new(handler_fn(move |_key: &str, _msg: &u32| -> HandlerFuture {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
    }

    fn failing_handler() -> Arc<dyn MessageHandler<u32>> {
        Arc::new(handler_fn(|_key: &str, _msg: &u32| -> HandlerFuture {
            Box::pin(async { Err("handler rejected the message".into()) })
        }))
    }

    #[test]
    fn publish_reaches_all_handlers_and_aggregates_failures() {
        init_test("publish_reaches_all_handlers_and_aggregates_failures");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));

        block_on(async {
            let _a = router
                .register_callback("", failing_handler(), &cancel)
                .await
                .expect("register failing");
            let _b = router
                .register_callback("", counting_handler(Arc::clone(&count)), &cancel)
                .await
                .expect("register counting");

            let result = router.publish_message("", 15).await;
            crate::assert_with_log!(
                result.receiver_count == 2,
                "receiver count",
                2usize,
                result.receiver_count
            );
            let aggregate = result.error.expect("aggregate present");
            assert_eq!(aggregate.failures.len(), 1);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        crate::test_complete!("publish_reaches_all_handlers_and_aggregates_failures");
    }

    #[test]
    fn released_subscription_stops_delivery() {
        init_test("released_subscription_stops_delivery");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));

        block_on(async {
            let mut sub = router
                .register_callback("k", counting_handler(Arc::clone(&count)), &cancel)
                .await
                .expect("register");

            let first = router.publish_message("k", 1).await;
            assert_eq!(first.receiver_count, 1);

            sub.release(&cancel).await.expect("release");
            assert!(sub.is_released());

            let second = router.publish_message("k", 2).await;
            assert_eq!(second.receiver_count, 0);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        crate::test_complete!("released_subscription_stops_delivery");
    }

    #[test]
    fn duplicate_handler_same_key_is_rejected() {
        init_test("duplicate_handler_same_key_is_rejected");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let handler = counting_handler(Arc::new(AtomicUsize::new(0)));

        block_on(async {
            let _sub = router
                .register_callback("dup", Arc::clone(&handler), &cancel)
                .await
                .expect("first registration");
            let result = router
                .register_callback("DUP", Arc::clone(&handler), &cancel)
                .await;
            assert_eq!(result.err(), Some(RouterError::DuplicateHandler));
        });
        crate::test_complete!("duplicate_handler_same_key_is_rejected");
    }

    #[test]
    fn duplicate_handler_distinct_keys_dispatches_once() {
        init_test("duplicate_handler_distinct_keys_dispatches_once");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&count));

        block_on(async {
            let _a = router
                .register_callback("one", Arc::clone(&handler), &cancel)
                .await
                .expect("register one");
            let _b = router
                .register_callback("two", Arc::clone(&handler), &cancel)
                .await
                .expect("register two");

            let result = router.publish_message("one", 9).await;
            // De-duplicated at dispatch: one distinct invocation.
            assert_eq!(result.receiver_count, 1);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        crate::test_complete!("duplicate_handler_distinct_keys_dispatches_once");
    }

    #[test]
    fn dropped_subscription_best_effort_unregisters() {
        init_test("dropped_subscription_best_effort_unregisters");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));

        block_on(async {
            let sub = router
                .register_callback("k", counting_handler(Arc::clone(&count)), &cancel)
                .await
                .expect("register");
            assert_eq!(router.subscription_count(), 1);
            drop(sub);
        });
        assert_eq!(router.subscription_count(), 0);
        crate::test_complete!("dropped_subscription_best_effort_unregisters");
    }

    #[test]
    fn release_after_router_dropped_is_noop() {
        init_test("release_after_router_dropped_is_noop");
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));

        let mut sub = block_on(async {
            let router = BroadcastRouter::new();
            router
                .register_callback("k", counting_handler(Arc::clone(&count)), &cancel)
                .await
                .expect("register")
            // Router dropped here.
        });
        block_on(async {
            sub.release(&cancel).await.expect("release is a no-op");
        });
        assert!(sub.is_released());
        crate::test_complete!("release_after_router_dropped_is_noop");
    }

    #[test]
    fn panicking_handler_is_aggregated() {
        init_test("panicking_handler_is_aggregated");
        let router = BroadcastRouter::new();
        let cancel = CancelToken::never();
        let count = Arc::new(AtomicUsize::new(0));

        block_on(async {
            let panicking: Arc<dyn MessageHandler<u32>> =
                Arc::new(handler_fn(|_key: &str, _msg: &u32| -> HandlerFuture {
                    Box::pin(async { panic!("handler exploded") })
                }));
            let _a = router
                .register_callback("k", panicking, &cancel)
                .await
                .expect("register panicking");
            let _b = router
                .register_callback("k", counting_handler(Arc::clone(&count)), &cancel)
                .await
                .expect("register counting");

            let result = router.publish_message("k", 1).await;
            assert_eq!(result.receiver_count, 2);
            let aggregate = result.error.expect("aggregate present");
            assert!(matches!(
                aggregate.failures[0],
                HandlerFailure::Panicked(_)
            ));
        });
        // The panicking neighbor must not have suppressed delivery.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        crate::test_complete!("panicking_handler_is_aggregated");
    }
}
