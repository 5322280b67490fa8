//! Capacity-bounded asynchronous producer/consumer queue.
//!
//! [`BoundedQueue`] layers two FIFO semaphores over a caller-supplied
//! ordered collection: `items` counts elements ready to take, `slots`
//! (bounded queues only) counts free capacity. The queue preserves
//! whatever order the backing preserves — FIFO with the default
//! [`SegQueue`], LIFO with a stack.
//!
//! Invariants: the `items` count always equals the backing length, and
//! for bounded queues `items + slots == capacity`.
//!
//! # Example
//!
//! ```
//! use fairsync::{BoundedQueue, CancelToken};
//! use fairsync::test_utils::block_on;
//!
//! let queue = BoundedQueue::bounded(2).unwrap();
//! block_on(async {
//!     let cancel = CancelToken::never();
//!     queue.add(1, &cancel).await.unwrap();
//!     queue.add(2, &cancel).await.unwrap();
//!     assert_eq!(queue.take(&cancel).await.unwrap(), 1);
//! });
//! ```

use core::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::{ArrayQueue, SegQueue};
use thiserror::Error;

use crate::cancel::{CancelSource, CancelToken};
use crate::error::{Error, Result};
use crate::semaphore::Semaphore;

/// The ordered collection backing a [`BoundedQueue`].
///
/// The queue assumes nothing beyond ordered add/take semantics; the
/// implementation must be safe under concurrent callers (the crossbeam
/// queues are lock-free).
pub trait OrderedBacking<T>: Send + Sync {
    /// Adds an item, returning it if the collection refuses.
    fn offer(&self, item: T) -> core::result::Result<(), T>;
    /// Removes the next item in collection order.
    fn poll(&self) -> Option<T>;
    /// Number of items currently stored.
    fn len(&self) -> usize;
    /// Returns true if no items are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> OrderedBacking<T> for SegQueue<T> {
    fn offer(&self, item: T) -> core::result::Result<(), T> {
        self.push(item);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        self.pop()
    }

    fn len(&self) -> usize {
        SegQueue::len(self)
    }
}

impl<T: Send> OrderedBacking<T> for ArrayQueue<T> {
    fn offer(&self, item: T) -> core::result::Result<(), T> {
        self.push(item)
    }

    fn poll(&self) -> Option<T> {
        self.pop()
    }

    fn len(&self) -> usize {
        ArrayQueue::len(self)
    }
}

/// Error returned when an asynchronous add fails. Carries the item back.
#[derive(Debug)]
pub enum AddError<T> {
    /// Cancelled while waiting for a free slot.
    Cancelled(T),
    /// The backing collection refused the item.
    Rejected(T),
}

impl<T> AddError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Cancelled(item) | Self::Rejected(item) => item,
        }
    }
}

impl<T> fmt::Display for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(_) => write!(f, "queue add cancelled"),
            Self::Rejected(_) => write!(f, "backing collection rejected the item"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for AddError<T> {}

/// Error returned when a non-blocking add fails. Carries the item back.
#[derive(Debug)]
pub enum TryAddError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The backing collection refused the item.
    Rejected(T),
}

impl<T> TryAddError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Rejected(item) => item,
        }
    }
}

impl<T> fmt::Display for TryAddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue is full"),
            Self::Rejected(_) => write!(f, "backing collection rejected the item"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TryAddError<T> {}

/// Error returned when an asynchronous take fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TakeError {
    /// Cancelled while waiting for an item.
    #[error("queue take cancelled")]
    Cancelled,
}

/// A capacity-bounded asynchronous producer/consumer queue.
#[derive(Debug)]
pub struct BoundedQueue<T, B: OrderedBacking<T> = SegQueue<T>> {
    backing: B,
    items: Semaphore,
    slots: Option<Semaphore>,
    capacity: Option<usize>,
    stream_live: AtomicBool,
    _item: PhantomData<fn(T) -> T>,
}

impl<T: Send> BoundedQueue<T, SegQueue<T>> {
    /// Creates an unbounded FIFO queue.
    #[must_use]
    pub fn unbounded() -> Self {
        match Self::with_backing(SegQueue::new(), None) {
            Ok(queue) => queue,
            Err(_) => unreachable!("unbounded construction cannot fail"),
        }
    }

    /// Creates a FIFO queue bounded to `capacity` items.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<Self> {
        Self::with_backing(SegQueue::new(), Some(capacity))
    }
}

impl<T, B: OrderedBacking<T>> BoundedQueue<T, B> {
    /// Wraps a caller-supplied backing, optionally bounding capacity.
    ///
    /// Items already in the backing are observed as the queue's initial
    /// contents.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if `capacity` is zero or the backing
    /// already holds more than `capacity` items.
    pub fn with_backing(backing: B, capacity: Option<usize>) -> Result<Self> {
        let prefilled = backing.len();
        let slots = match capacity {
            Some(0) => {
                return Err(Error::invalid_argument("queue capacity must be positive"));
            }
            Some(cap) if prefilled > cap => {
                return Err(Error::invalid_argument(
                    "backing collection exceeds queue capacity",
                ));
            }
            Some(cap) => Some(Semaphore::bounded(cap - prefilled, cap)),
            None => None,
        };
        let items = match capacity {
            Some(cap) => Semaphore::bounded(prefilled, cap),
            None => Semaphore::new(prefilled),
        };
        Ok(Self {
            backing,
            items,
            slots,
            capacity,
            stream_live: AtomicBool::new(false),
            _item: PhantomData,
        })
    }

    /// Number of items currently available to take.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.available()
    }

    /// Returns true if no items are available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity, or `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Adds an item, awaiting a free slot when the queue is bounded.
    ///
    /// # Errors
    ///
    /// Fails with [`AddError::Cancelled`] if the token fires while
    /// waiting, or [`AddError::Rejected`] if the backing refuses the
    /// item (the reserved slot is returned).
    pub async fn add(&self, item: T, cancel: &CancelToken) -> core::result::Result<(), AddError<T>> {
        if let Some(slots) = &self.slots {
            if slots.acquire(cancel).await.is_err() {
                return Err(AddError::Cancelled(item));
            }
        } else if cancel.is_cancelled() {
            return Err(AddError::Cancelled(item));
        }
        match self.backing.offer(item) {
            Ok(()) => {
                self.items.release();
                Ok(())
            }
            Err(item) => {
                if let Some(slots) = &self.slots {
                    slots.release();
                }
                Err(AddError::Rejected(item))
            }
        }
    }

    /// Adds an item without waiting.
    ///
    /// # Errors
    ///
    /// Fails with [`TryAddError::Full`] when no slot is free, or
    /// [`TryAddError::Rejected`] if the backing refuses the item.
    pub fn try_add(&self, item: T) -> core::result::Result<(), TryAddError<T>> {
        if let Some(slots) = &self.slots {
            if !slots.try_acquire() {
                return Err(TryAddError::Full(item));
            }
        }
        match self.backing.offer(item) {
            Ok(()) => {
                self.items.release();
                Ok(())
            }
            Err(item) => {
                if let Some(slots) = &self.slots {
                    slots.release();
                }
                Err(TryAddError::Rejected(item))
            }
        }
    }

    /// Removes the next item, awaiting one when the queue is empty.
    ///
    /// # Errors
    ///
    /// Fails with [`TakeError::Cancelled`] if the token fires while
    /// waiting.
    pub async fn take(&self, cancel: &CancelToken) -> core::result::Result<T, TakeError> {
        if self.items.acquire(cancel).await.is_err() {
            return Err(TakeError::Cancelled);
        }
        let Some(item) = self.backing.poll() else {
            unreachable!("items semaphore out of sync with backing collection")
        };
        if let Some(slots) = &self.slots {
            slots.release();
        }
        Ok(item)
    }

    /// Removes the next item without waiting.
    pub fn try_take(&self) -> Option<T> {
        if !self.items.try_acquire() {
            return None;
        }
        let Some(item) = self.backing.poll() else {
            unreachable!("items semaphore out of sync with backing collection")
        };
        if let Some(slots) = &self.slots {
            slots.release();
        }
        Some(item)
    }

    /// Hands out the single live consuming stream over this queue.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` while another stream is live; dropping
    /// that stream frees the slot.
    pub fn consuming_stream(&self) -> Result<ConsumingStream<'_, T, B>> {
        if self.stream_live.swap(true, Ordering::AcqRel) {
            return Err(Error::invalid_state("a consuming stream is already active"));
        }
        Ok(ConsumingStream {
            queue: self,
            source: CancelSource::new(),
        })
    }
}

/// A lazy, single-consumer sequence draining a [`BoundedQueue`].
///
/// Each step performs a [`take`](BoundedQueue::take) observing both the
/// caller's token and the stream's internal cancel source; dropping the
/// stream cancels the internal source and frees the queue's stream slot.
#[derive(Debug)]
pub struct ConsumingStream<'a, T, B: OrderedBacking<T>> {
    queue: &'a BoundedQueue<T, B>,
    source: CancelSource,
}

impl<T, B: OrderedBacking<T>> ConsumingStream<'_, T, B> {
    /// Takes the next element.
    ///
    /// # Errors
    ///
    /// Fails with [`TakeError::Cancelled`] if either the caller token or
    /// the stream's internal source fires while waiting.
    pub async fn next(&mut self, cancel: &CancelToken) -> core::result::Result<T, TakeError> {
        let linked = CancelToken::linked(cancel, &self.source.token());
        self.queue.take(&linked).await
    }
}

impl<T, B: OrderedBacking<T>> Drop for ConsumingStream<'_, T, B> {
    fn drop(&mut self) {
        self.source.cancel();
        self.queue.stream_live.store(false, Ordering::Release);
    }
}
