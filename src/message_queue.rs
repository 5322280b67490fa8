//! Drop-oldest bounded sink that binds to message routers.
//!
//! A [`MessageQueue`] registers a handler with one or more routers; every
//! delivered message is enqueued into an internal [`BoundedQueue`]. When
//! the queue is bounded and full, the oldest element is evicted and the
//! insert retried until it succeeds — delivery never parks a router's
//! publish path.
//!
//! # Example
//!
//! ```
//! use fairsync::{CancelToken, MessageQueue};
//! use fairsync::router::{BroadcastRouter, Router};
//! use fairsync::test_utils::block_on;
//!
//! let router = BroadcastRouter::new();
//! let queue = MessageQueue::bounded(8).unwrap();
//! block_on(async {
//!     let cancel = CancelToken::never();
//!     let _binding = queue.bind("events", &router, &cancel).await.unwrap();
//!     router.publish_message("events", 7u32).await;
//!     assert_eq!(queue.take_message(&cancel).await.unwrap(), 7);
//! });
//! ```

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::queue::{BoundedQueue, TakeError, TryAddError};
use crate::router::{handler_fn, HandlerFuture, MessageHandler, Router, RouterError, Subscription};

/// A bounded message sink fed by router subscriptions.
#[derive(Debug)]
pub struct MessageQueue<M: Send> {
    queue: Arc<BoundedQueue<M, SegQueue<M>>>,
}

impl<M: Clone + Send + 'static> MessageQueue<M> {
    /// Creates a sink with no capacity bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            queue: Arc::new(BoundedQueue::unbounded()),
        }
    }

    /// Creates a sink bounded to `capacity` messages.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: Arc::new(BoundedQueue::bounded(capacity)?),
        })
    }

    /// Number of messages currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no messages are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Binds this sink to a router under `key`.
    ///
    /// The returned subscription handle controls the binding's lifetime;
    /// releasing it stops delivery. A queue may be bound to any number of
    /// routers.
    ///
    /// # Errors
    ///
    /// Propagates the router's registration errors.
    pub async fn bind(
        &self,
        key: &str,
        router: &dyn Router<M>,
        cancel: &CancelToken,
    ) -> std::result::Result<Subscription<M>, RouterError> {
        let queue = Arc::clone(&self.queue);
        let handler: Arc<dyn MessageHandler<M>> =
            Arc::new(handler_fn(move |_key: &str, message: &M| -> HandlerFuture {
                let queue = Arc::clone(&queue);
                let message = message.clone();
                Box::pin(async move {
                    enqueue_drop_oldest(&queue, message);
                    Ok(())
                })
            }));
        router.register_callback(key, handler, cancel).await
    }

    /// Takes the next message, awaiting one when the sink is empty.
    ///
    /// # Errors
    ///
    /// Fails with [`TakeError::Cancelled`] if the token fires while
    /// waiting.
    pub async fn take_message(&self, cancel: &CancelToken) -> std::result::Result<M, TakeError> {
        self.queue.take(cancel).await
    }

    /// Takes the next message without waiting.
    pub fn try_take_message(&self) -> Option<M> {
        self.queue.try_take()
    }
}

/// Inserts with the drop-oldest policy: on a full queue, evict the head
/// and retry until the insert succeeds.
fn enqueue_drop_oldest<M: Send>(queue: &BoundedQueue<M, SegQueue<M>>, message: M) {
    let mut message = message;
    loop {
        match queue.try_add(message) {
            Ok(()) => return,
            Err(TryAddError::Full(returned)) => {
                if queue.try_take().is_some() {
                    tracing::trace!("sink full; dropped oldest message");
                }
                message = returned;
            }
            Err(TryAddError::Rejected(_)) => {
                tracing::warn!("sink backing rejected a message; dropping it");
                return;
            }
        }
    }
}
