//! At-most-once-queued dirty tracking.
//!
//! Regions mark chunks, columns, and similar sub-areas dirty far more often
//! than they process them. [`SetQueueElement`] sits in front of a bounded
//! [`SetQueue`] as an idempotent guard: concurrent `add` calls enqueue the
//! element once, and it only becomes addable again after it is polled out.
//!
//! Stale entries are never removed eagerly. Elements report their own
//! liveness through [`Validatable`], and the queue drops invalid entries
//! lazily, either while reclaiming space on a full offer or when they reach
//! the head during a poll.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

/// Liveness predicate for queued values.
///
/// Invalid values are silently discarded instead of being returned by
/// [`SetQueue::poll`], so callers never have to remove entries for objects
/// that were unloaded or destroyed while queued.
pub trait Validatable {
    fn is_valid(&self) -> bool;
}

/// Errors from offering an element into a [`SetQueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetQueueError {
    /// The queue held `capacity` valid elements for the whole retry window.
    ///
    /// Distinct from "empty"/"not found": the element was *not* enqueued and
    /// its queued flag has been rolled back, so a later `add` may retry.
    #[error("set queue is full ({capacity} valid elements)")]
    Full { capacity: usize },

    /// The owning queue was dropped while this element was still live.
    #[error("set queue was dropped before the element could be added")]
    Detached,
}

/// Bounded concurrent queue holding each element at most once.
///
/// Multiple producers call [`SetQueueElement::add`] concurrently; one or
/// more consumers call [`SetQueue::poll`]. Order is FIFO-ish: validity
/// eviction may remove entries out of offer order.
pub struct SetQueue<T> {
    queue: Mutex<VecDeque<Arc<SetQueueElement<T>>>>,
    capacity: usize,
}

impl<T: Validatable> SetQueue<T> {
    /// Attempts made to reclaim space before an offer fails as full.
    const MAX_ADD_ATTEMPTS: usize = 10;

    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "set queue capacity must be non-zero");
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    /// Removes and returns the first valid element, clearing its queued flag.
    ///
    /// Invalid elements at the head are dropped and the next entry is tried,
    /// so a returned element is always valid as of removal time. Returns
    /// `None` once the queue is empty.
    pub fn poll(&self) -> Option<Arc<SetQueueElement<T>>> {
        loop {
            let element = {
                let mut queue = self.queue.lock();
                let element = queue.pop_front()?;
                // Cleared under the lock so the flag never claims membership
                // the queue no longer has.
                element.queued.store(false, Ordering::Release);
                element
            };
            if element.value.is_valid() {
                return Some(element);
            }
            // Stale entry: drop it and keep looking.
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an element whose queued flag the caller has just claimed.
    ///
    /// When full, each attempt evicts invalid entries (resetting their
    /// queued flags) to reclaim space, then yields so a consumer can drain.
    fn offer(&self, element: &Arc<SetQueueElement<T>>) -> Result<(), SetQueueError> {
        for attempt in 0..Self::MAX_ADD_ATTEMPTS {
            {
                let mut queue = self.queue.lock();
                if queue.len() >= self.capacity {
                    queue.retain(|entry| {
                        if entry.value.is_valid() {
                            true
                        } else {
                            entry.queued.store(false, Ordering::Release);
                            false
                        }
                    });
                }
                if queue.len() < self.capacity {
                    queue.push_back(Arc::clone(element));
                    return Ok(());
                }
            }
            if attempt + 1 < Self::MAX_ADD_ATTEMPTS {
                thread::yield_now();
            }
        }
        warn!(
            capacity = self.capacity,
            attempts = Self::MAX_ADD_ATTEMPTS,
            "set queue still full after eviction attempts"
        );
        Err(SetQueueError::Full {
            capacity: self.capacity,
        })
    }
}

impl<T> fmt::Debug for SetQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetQueue")
            .field("len", &self.queue.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Idempotent "is this dirty?" guard in front of a [`SetQueue`].
///
/// The queued flag claims membership atomically: exactly one of any number
/// of concurrent [`add`](Self::add) calls wins the `false -> true`
/// transition and enqueues the element. The flag is only cleared by the
/// claiming thread on a failed offer, by a poll removing the element, or by
/// validity eviction, so the flag and actual queue membership never diverge.
pub struct SetQueueElement<T> {
    queue: Weak<SetQueue<T>>,
    value: T,
    queued: AtomicBool,
}

impl<T: Validatable> SetQueueElement<T> {
    /// Creates an element owned by `queue`, wrapping `value`.
    #[must_use]
    pub fn new(queue: &Arc<SetQueue<T>>, value: T) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::downgrade(queue),
            value,
            queued: AtomicBool::new(false),
        })
    }

    /// Enqueues this element into its owning queue if it is not queued yet.
    ///
    /// Returns `Ok(true)` if this call enqueued the element, `Ok(false)` if
    /// it was already queued (success without effect). On
    /// [`SetQueueError::Full`] the queued flag is rolled back so a later
    /// call can retry.
    pub fn add(self: &Arc<Self>) -> Result<bool, SetQueueError> {
        if self
            .queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }
        let Some(queue) = self.queue.upgrade() else {
            self.queued.store(false, Ordering::Release);
            return Err(SetQueueError::Detached);
        };
        match queue.offer(self) {
            Ok(()) => Ok(true),
            Err(err) => {
                // We own the claimed flag, so the rollback cannot race
                // another producer's claim.
                self.queued.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for SetQueueElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetQueueElement")
            .field("queued", &self.queued.load(Ordering::Acquire))
            .finish()
    }
}
