//! Bounded FIFO queue with blocking batch operations.
//!
//! [`BoundedQueue`] is the shared buffer between the ingest workers (writers) and the
//! augmentation workers (readers). Backpressure comes from its fixed capacity: an
//! `enqueue_many` blocks while the batch does not fit, a `dequeue_many` blocks until
//! enough items are buffered. Batches are applied atomically; readers never observe a
//! partially enqueued batch.
//!
//! Order is FIFO per writer. With multiple writers racing on `enqueue_many` there is no
//! cross-writer interleaving guarantee.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::bail;
use crate::error::{ErrorKind, FeedResult};

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A finite-capacity, concurrency-safe FIFO container.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    space_available: Notify,
    items_available: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given fixed capacity.
    ///
    /// The capacity never changes for the lifetime of the queue.
    pub fn new(capacity: usize) -> FeedResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Queue capacity must be non-zero"
            );
        }

        Ok(Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            space_available: Notify::new(),
            items_available: Notify::new(),
        })
    }

    /// Returns the fixed capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of currently buffered items.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Returns `true` if the queue holds no items.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns `true` if the queue has been closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Appends all items as one atomic batch, blocking while the queue is too full.
    ///
    /// A batch larger than the queue capacity can never fit and is rejected with
    /// [`ErrorKind::InvalidQueueConfig`] instead of blocking forever. If the queue is
    /// closed before the batch was applied, the call fails with
    /// [`ErrorKind::QueueClosed`] and the in-flight batch is discarded; workers treat
    /// that as an expected shutdown notification.
    pub async fn enqueue_many(&self, items: Vec<T>) -> FeedResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        if items.len() > self.capacity {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Batch exceeds queue capacity",
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
                    bail!(ErrorKind::QueueClosed, "Queue closed while enqueueing");
                }

                if self.capacity - inner.items.len() >= items.len() {
                    inner.items.extend(items.drain(..));
                    self.items_available.notify_waiters();

                    return Ok(());
                }

                // Register the waiter while still holding the lock, so a dequeue or a
                // close between unlock and await cannot be missed.
                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// Removes and returns exactly `count` items in FIFO order, blocking until enough
    /// items are buffered.
    ///
    /// After the queue is closed, remaining buffered items can still be drained; once
    /// fewer than `count` remain the call fails with [`ErrorKind::QueueClosed`].
    pub async fn dequeue_many(&self, count: usize) -> FeedResult<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        if count > self.capacity {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Requested more items than the queue can ever hold",
                format!("requested = {count}, capacity = {}", self.capacity)
            );
        }

        loop {
            let notified = self.items_available.notified();
            tokio::pin!(notified);

            {
                let mut inner = self.inner.lock().await;

                if inner.items.len() >= count {
                    let drained = inner.items.drain(..count).collect();
                    self.space_available.notify_waiters();

                    return Ok(drained);
                }

                if inner.closed {
                    bail!(ErrorKind::QueueClosed, "Queue closed and drained");
                }

                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// Closes the queue, waking every blocked enqueue and dequeue.
    ///
    /// Idempotent. Blocked enqueues fail promptly with a close notification; blocked
    /// dequeues either drain what is left or fail the same way.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn enqueue_and_dequeue_preserve_fifo_order() {
        let queue = BoundedQueue::new(8).unwrap();

        queue.enqueue_many(vec![1, 2, 3]).await.unwrap();
        queue.enqueue_many(vec![4, 5]).await.unwrap();

        assert_eq!(queue.dequeue_many(4).await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn buffered_count_never_exceeds_capacity() {
        let queue = Arc::new(BoundedQueue::new(4).unwrap());

        queue.enqueue_many(vec![1, 2, 3]).await.unwrap();

        // A batch of two does not fit; the enqueue must block until space is freed.
        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_many(vec![4, 5]).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        assert_eq!(queue.len().await, 3);

        queue.dequeue_many(2).await.unwrap();
        blocked.await.unwrap().unwrap();
        assert_eq!(queue.len().await, 3);
        assert!(queue.len().await <= queue.capacity());
    }

    #[tokio::test]
    async fn batch_enqueue_is_all_or_nothing() {
        let queue = Arc::new(BoundedQueue::new(4).unwrap());
        queue.enqueue_many(vec![1, 2, 3]).await.unwrap();

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_many(vec![4, 5]).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;

        // While the batch is blocked none of its items may be visible.
        assert_eq!(queue.len().await, 3);

        drop(blocked);
        queue.close().await;
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_immediately() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(2).unwrap();

        let err = queue.enqueue_many(vec![1, 2, 3]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQueueConfig);

        let err = queue.dequeue_many(3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQueueConfig);
    }

    #[tokio::test]
    async fn dequeue_blocks_on_empty_open_queue() {
        use futures::FutureExt;

        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(4).unwrap());

        // An empty queue that was never closed must block, not error.
        assert!(queue.dequeue_many(1).now_or_never().is_none());

        queue.enqueue_many(vec![7]).await.unwrap();
        assert_eq!(queue.dequeue_many(1).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn close_unblocks_pending_enqueue_with_close_error() {
        let queue = Arc::new(BoundedQueue::new(2).unwrap());
        queue.enqueue_many(vec![1, 2]).await.unwrap();

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue_many(vec![3]).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close().await;

        let err = timeout(Duration::from_secs(1), blocked)
            .await
            .expect("enqueue must unblock at close notification latency")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);
    }

    #[tokio::test]
    async fn close_unblocks_pending_dequeue() {
        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(4).unwrap());

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_many(2).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close().await;

        let err = timeout(Duration::from_secs(1), blocked)
            .await
            .expect("dequeue must unblock at close notification latency")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);
    }

    #[tokio::test]
    async fn closed_queue_drains_remaining_items_before_failing() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.enqueue_many(vec![1, 2, 3]).await.unwrap();
        queue.close().await;

        assert_eq!(queue.dequeue_many(2).await.unwrap(), vec![1, 2]);

        // Two requested, one left: drained below the request fails.
        let err = queue.dequeue_many(2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(2).unwrap();
        queue.close().await;
        queue.close().await;
        assert!(queue.is_closed().await);
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let err = BoundedQueue::<u8>::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQueueConfig);
    }
}
