//! Randomized reservoir queue with a minimum-fill precondition.
//!
//! [`ShuffleQueue`] is the buffer between the augmentation workers (writers) and the
//! training loop (sole reader). It decorrelates training order from ingestion order:
//! a dequeue returns a uniformly random subset of the buffered contents, sampled
//! without replacement via a partial Fisher-Yates pass over the buffer.
//!
//! A dequeue is served only once the buffered count reaches the min-fill threshold, so
//! early minibatches are already drawn from a mixed reservoir. The queue deliberately
//! offers no ordering guarantee of any kind.

use std::collections::VecDeque;

use rand::Rng;
use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::error::{ErrorKind, FeedResult};

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded queue whose dequeues return randomized selections of its contents.
#[derive(Debug)]
pub struct ShuffleQueue<T> {
    capacity: usize,
    min_fill: usize,
    inner: Mutex<Inner<T>>,
    space_available: Notify,
    items_available: Notify,
}

impl<T> ShuffleQueue<T> {
    /// Creates a reservoir with the given capacity and min-fill threshold.
    ///
    /// The threshold must not exceed the capacity; that configuration could never serve
    /// a dequeue and is rejected before any worker is spawned against the queue.
    pub fn new(capacity: usize, min_fill: usize) -> FeedResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Shuffle queue capacity must be non-zero"
            );
        }

        if min_fill > capacity {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Shuffle queue min fill exceeds its capacity",
                format!("min_fill = {min_fill}, capacity = {capacity}")
            );
        }

        Ok(Self {
            capacity,
            min_fill,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            space_available: Notify::new(),
            items_available: Notify::new(),
        })
    }

    /// Returns the fixed capacity of the reservoir.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the min-fill threshold below which dequeues are held back.
    pub fn min_fill(&self) -> usize {
        self.min_fill
    }

    /// Returns the number of currently buffered items.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Returns `true` if the reservoir holds no items.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns `true` if the reservoir has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Appends all items as one atomic batch, blocking while the reservoir is too full.
    ///
    /// Same contract as [`crate::concurrency::queue::BoundedQueue::enqueue_many`]: no
    /// partial-batch visibility, oversized batches rejected, close discards the
    /// in-flight batch with [`ErrorKind::QueueClosed`].
    pub async fn enqueue_many(&self, items: Vec<T>) -> FeedResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        if items.len() > self.capacity {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Batch exceeds shuffle queue capacity",
                format!("batch = {}, capacity = {}", items.len(), self.capacity)
            );
        }

        let mut items = items;
        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().await;

                if inner.closed {
                    bail!(
                        ErrorKind::QueueClosed,
                        "Shuffle queue closed while enqueueing"
                    );
                }

                if self.capacity - inner.items.len() >= items.len() {
                    inner.items.extend(items.drain(..));
                    self.items_available.notify_waiters();

                    return Ok(());
                }

                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// Removes and returns `count` items sampled uniformly without replacement.
    ///
    /// Blocks until the buffered count reaches `max(min_fill, count)`. After the
    /// reservoir is closed the min-fill precondition is waived so remaining items can
    /// be drained; once fewer than `count` remain the call fails with
    /// [`ErrorKind::QueueClosed`].
    pub async fn dequeue_many(&self, count: usize) -> FeedResult<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        if count > self.capacity {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Requested more items than the shuffle queue can ever hold",
                format!("requested = {count}, capacity = {}", self.capacity)
            );
        }

        loop {
            let notified = self.items_available.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().await;

                let required = if inner.closed {
                    count
                } else {
                    count.max(self.min_fill)
                };

                if inner.items.len() >= required {
                    let selected = Self::sample_without_replacement(&mut inner.items, count);
                    self.space_available.notify_waiters();

                    return Ok(selected);
                }

                if inner.closed {
                    bail!(ErrorKind::QueueClosed, "Shuffle queue closed and drained");
                }

                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// Closes the reservoir, waking every blocked enqueue and dequeue.
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }

            inner.closed = true;
        }

        self.space_available.notify_waiters();
        self.items_available.notify_waiters();
    }

    /// Partial Fisher-Yates over the buffer: each selected item is swapped to the back
    /// and popped, so the draw is uniform and leftover items stay in the reservoir.
    fn sample_without_replacement(items: &mut VecDeque<T>, count: usize) -> Vec<T> {
        let mut rng = rand::thread_rng();
        let mut selected = Vec::with_capacity(count);

        for _ in 0..count {
            let len = items.len();
            let index = rng.gen_range(0..len);
            items.swap(index, len - 1);
            selected.push(items.pop_back().expect("reservoir holds at least one item"));
        }

        selected
    }
}
