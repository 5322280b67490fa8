//! Fairsync: FIFO-fair, cancellable, parkable synchronization primitives
//! for cooperative schedulers.
//!
//! # Overview
//!
//! Fairsync provides asynchronous analogues of the classic thread-blocking
//! primitives — mutex, reader/writer lock, bounded queue, one-shot flag,
//! pub/sub router — that never block an underlying worker. Waiters are
//! parked as future-like completion cells and resumed exactly when the
//! primitive's state permits. The crate is runtime-agnostic: every
//! suspending operation is a plain [`Future`](std::future::Future) driven
//! by whatever executor the caller uses.
//!
//! # Core Guarantees
//!
//! - **FIFO fairness**: suspended acquirers are serviced in arrival
//!   order; `try_` operations never barge past a parked waiter
//! - **Cancel-correctness**: every suspending operation takes a
//!   [`CancelToken`]; cancellation removes the waiter and restores
//!   primitive state, handing ownership onward when the waiter was next
//! - **Idempotent release**: every release path is guarded by a one-shot
//!   flag; double release is structurally impossible
//! - **Writer-preferring reads**: the reader/writer lock queues readers
//!   behind a waiting writer, and batch-activates them the moment the
//!   last queued writer releases or cancels
//! - **Torn-free publication**: routers publish against one atomic
//!   copy-on-write snapshot; a publish racing a registration sees the
//!   pre- or post-state, never a mix
//!
//! # Module Structure
//!
//! - [`cancel`]: Cancellation sources, tokens, and composition
//! - [`once_flag`]: Lock-free one-shot latch
//! - [`release`]: Idempotent release guards
//! - [`gate`]: Inner gates protecting waiter FIFOs (monitor and spin-CAS)
//! - [`mutex`]: The three-variant FIFO mutex family
//! - [`semaphore`]: FIFO counting semaphore
//! - [`rwlock`]: Writer-preferring reader/writer lock
//! - [`queue`]: Bounded producer/consumer queue and consuming stream
//! - [`router`]: Broadcast and keyed message routers
//! - [`message_queue`]: Drop-oldest sink bound to routers
//! - [`error`]: Error taxonomy
//! - [`test_utils`]: Logging, a thread-parking executor, and assertion
//!   macros for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod error;
pub mod gate;
pub mod message_queue;
pub mod mutex;
pub mod once_flag;
pub mod queue;
pub mod release;
pub mod router;
pub mod rwlock;
pub mod semaphore;
pub mod test_utils;
mod waiter;

// Re-exports for convenient access to core types
pub use cancel::{CancelSource, CancelToken};
pub use error::{Error, ErrorKind, Result};
pub use gate::{MonitorGate, QueueGate, SpinConfig, SpinGate};
pub use message_queue::MessageQueue;
pub use mutex::{FifoMutex, LockError, Mutex, MutexGuard, SemMutex, SpinMutex};
pub use once_flag::OnceFlag;
pub use queue::{AddError, BoundedQueue, ConsumingStream, OrderedBacking, TakeError, TryAddError};
pub use release::{AsyncScopedRelease, BoxedRelease, ScopedRelease};
pub use router::{
    BroadcastRouter, KeyedRouter, MessageHandler, PublishResult, Router, RouterError, Subscription,
};
pub use rwlock::{RwLock, RwLockError, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::{AcquireError, Semaphore};
