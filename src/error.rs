//! Error types and error-handling strategy for fairsync.
//!
//! Every failure a caller can observe is typed. The taxonomy is small:
//!
//! - **Cancelled**: a suspending operation was cancelled through its token.
//! - **InvalidArgument**: a constructor or registration was handed a value
//!   that can never be valid (zero capacity, empty binding key, ...).
//! - **InvalidState**: the operation is valid in general but not right now
//!   (duplicate registration, a second live consuming stream, ...).
//!
//! Handler failures during a publish are never raised; they are aggregated
//! and carried inside the publish result (see [`crate::router`]).
//! Internal invariant violations are bugs and abort via panic.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation was cancelled through its cancellation token.
    Cancelled,
    /// An argument was invalid regardless of current state.
    InvalidArgument,
    /// The operation is not permitted in the current state.
    InvalidState,
}

/// The main error type for fairsync operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates an invalid-argument error with context.
    #[must_use]
    pub fn invalid_argument(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_context(ctx)
    }

    /// Creates an invalid-state error with context.
    #[must_use]
    pub fn invalid_state(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState).with_context(ctx)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for fairsync operations.
pub type Result<T> = core::result::Result<T, Error>;
