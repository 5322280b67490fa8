//! Handler contract and publish results.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Boxed error produced by a failing handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// An asynchronous message handler.
///
/// Handlers are invoked with the publish key and a reference to the
/// message; anything the returned future needs must be captured (cloned)
/// before it is returned. Handler identity — used for duplicate
/// detection and dispatch de-duplication — is `Arc` pointer identity.
pub trait MessageHandler<M>: Send + Sync {
    /// Handles one published message.
    fn handle(&self, key: &str, message: &M) -> HandlerFuture;
}

/// Adapter turning a closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<M, F> MessageHandler<M> for FnHandler<F>
where
    F: Fn(&str, &M) -> HandlerFuture + Send + Sync,
{
    fn handle(&self, key: &str, message: &M) -> HandlerFuture {
        (self.0)(key, message)
    }
}

/// Wraps a closure as a [`MessageHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

/// One handler's failure during a publish.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(BoxError),
    /// The handler panicked; the payload is captured as text.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Aggregate of every handler failure from one publish.
#[derive(Debug, Error)]
#[error("{} message handler(s) failed", .failures.len())]
pub struct AggregateError {
    /// The individual failures, in dispatch order.
    pub failures: Vec<HandlerFailure>,
}

/// Outcome of a publish.
///
/// Handler failures are carried here, never raised: a publish itself
/// cannot fail.
#[derive(Debug)]
pub struct PublishResult {
    /// Number of distinct handlers the message was dispatched to.
    pub receiver_count: usize,
    /// Aggregated handler failures, if any.
    pub error: Option<AggregateError>,
}

impl PublishResult {
    /// Returns true if every handler completed successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
