//! Message routers: broadcast and keyed pub/sub dispatch.
//!
//! A router dispatches published messages to registered asynchronous
//! handlers. Registration and unregistration serialize on an internal
//! fairsync [`Mutex`](crate::Mutex); publication reads one atomic
//! copy-on-write snapshot and never locks, so a publish racing a
//! registration sees either the pre- or post-state, never a torn one.
//!
//! Handler failures — including panics — are folded into a single
//! aggregate carried inside the [`PublishResult`]; one failing handler
//! never suppresses the rest. The aggregate is returned, never raised.
//!
//! Routers are not persistent, do not buffer, and are not transactional.
//!
//! # Example
//!
//! ```
//! use fairsync::router::{handler_fn, BroadcastRouter, HandlerFuture};
//! use fairsync::{CancelToken, test_utils::block_on};
//! use std::sync::Arc;
//!
//! let router = BroadcastRouter::new();
//! block_on(async {
//!     let cancel = CancelToken::never();
//!     let handler = Arc::new(handler_fn(|_key: &str, msg: &u32| -> HandlerFuture {
//!         let msg = *msg;
//!         Box::pin(async move {
//!             assert_eq!(msg, 15);
//!             Ok(())
//!         })
//!     }));
//!     let _sub = router.register_callback("", handler, &cancel).await.unwrap();
//!     let result = router.publish_message("", 15).await;
//!     assert_eq!(result.receiver_count, 1);
//!     assert!(result.error.is_none());
//! });
//! ```

mod broadcast;
mod handler;
mod join;
mod keyed;
mod subscription;

pub use broadcast::BroadcastRouter;
pub use handler::{
    handler_fn, AggregateError, BoxError, FnHandler, HandlerFailure, HandlerFuture,
    MessageHandler, PublishResult,
};
pub use keyed::KeyedRouter;
pub use subscription::Subscription;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{Error, ErrorKind};

/// Error returned by router registration and unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Cancelled while acquiring the registration mutex.
    #[error("router operation cancelled")]
    Cancelled,
    /// The binding key must not be empty.
    #[error("binding key must not be empty")]
    EmptyKey,
    /// The same handler is already registered under this binding key.
    #[error("handler already registered under this binding key")]
    DuplicateHandler,
}

impl From<RouterError> for Error {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::Cancelled => Self::cancelled(),
            RouterError::EmptyKey => Self::new(ErrorKind::InvalidArgument).with_context(err.to_string()),
            RouterError::DuplicateHandler => {
                Self::new(ErrorKind::InvalidState).with_context(err.to_string())
            }
        }
    }
}

/// Case-insensitive binding-key normalization shared by both routers.
pub(crate) fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

/// Object-safe router surface, implemented by [`BroadcastRouter`] and
/// [`KeyedRouter`].
#[async_trait]
pub trait Router<M: Send + 'static>: Send + Sync {
    /// Registers a handler under a binding key, returning its
    /// subscription handle.
    async fn register_callback(
        &self,
        binding_key: &str,
        handler: Arc<dyn MessageHandler<M>>,
        cancel: &CancelToken,
    ) -> Result<Subscription<M>, RouterError>;

    /// Publishes a message, invoking matching handlers and aggregating
    /// their failures.
    async fn publish_message(&self, key: &str, message: M) -> PublishResult;
}

#[async_trait]
impl<M: Send + 'static> Router<M> for BroadcastRouter<M> {
    async fn register_callback(
        &self,
        binding_key: &str,
        handler: Arc<dyn MessageHandler<M>>,
        cancel: &CancelToken,
    ) -> Result<Subscription<M>, RouterError> {
        Self::register_callback(self, binding_key, handler, cancel).await
    }

    async fn publish_message(&self, key: &str, message: M) -> PublishResult {
        Self::publish_message(self, key, message).await
    }
}

#[async_trait]
impl<M: Send + 'static> Router<M> for KeyedRouter<M> {
    async fn register_callback(
        &self,
        binding_key: &str,
        handler: Arc<dyn MessageHandler<M>>,
        cancel: &CancelToken,
    ) -> Result<Subscription<M>, RouterError> {
        Self::register_callback(self, binding_key, handler, cancel).await
    }

    async fn publish_message(&self, key: &str, message: M) -> PublishResult {
        Self::publish_message(self, key, message).await
    }
}
