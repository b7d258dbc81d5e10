//! Pool for managing a set of identical pipeline workers.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{ErrorKind, FeedResult};
use crate::feed_error;
use crate::workers::base::{WorkerHandle, WorkerType};

/// Internal state for [`WorkerPool`].
#[derive(Debug)]
pub struct WorkerPoolInner {
    /// Handles of every spawned worker, in spawn order.
    handles: Vec<WorkerHandle>,
    /// Owns all spawned worker tasks.
    join_set: JoinSet<(WorkerType, FeedResult<()>)>,
}

impl WorkerPoolInner {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Spawns a worker future and registers its handle for later joining.
    pub fn spawn<F>(&mut self, worker_type: WorkerType, future: F)
    where
        F: Future<Output = FeedResult<()>> + Send + 'static,
    {
        let abort_handle = self.join_set.spawn(async move {
            let result = future.await;
            (worker_type, result)
        });

        self.handles.push(WorkerHandle::new(worker_type, abort_handle));

        debug!(%worker_type, "spawned worker in pool");
    }

    /// Number of workers whose tasks have not finished yet.
    pub fn running(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Worker types of every worker whose task has not finished yet.
    pub fn running_workers(&self) -> Vec<WorkerType> {
        self.handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .map(|handle| handle.worker_type())
            .collect()
    }
}

/// Pool owning the lifecycle of one category of pipeline workers.
///
/// [`WorkerPool`] tracks every spawned worker of a pool, exposes how many are still
/// running (the liveness signal behind starvation detection), and aggregates worker
/// errors when joining them at shutdown.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<Mutex<WorkerPoolInner>>,
    panic_kind: ErrorKind,
}

impl WorkerPool {
    /// Creates a new empty pool.
    ///
    /// `panic_kind` classifies panics of this pool's workers when they are joined.
    pub fn new(panic_kind: ErrorKind) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WorkerPoolInner::new())),
            panic_kind,
        }
    }

    /// Number of workers whose tasks have not finished yet.
    pub async fn running(&self) -> usize {
        self.inner.lock().await.running()
    }

    /// Worker types of every worker whose task has not finished yet.
    pub async fn running_workers(&self) -> Vec<WorkerType> {
        self.inner.lock().await.running_workers()
    }

    /// Waits for all workers in the pool to complete.
    ///
    /// Worker errors are collected and returned aggregated, so a single failed worker
    /// does not hide the failures of its siblings. Workers that exited cleanly after a
    /// shutdown notification contribute nothing here.
    pub async fn wait_all(&self) -> FeedResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut inner = self.inner.lock().await;
                inner.join_set.join_next().await
            };

            let Some(result) = result else {
                // JoinSet is empty, all workers have completed.
                break;
            };

            match result {
                Ok((worker_type, Ok(()))) => {
                    debug!(%worker_type, "worker completed");
                }
                Ok((worker_type, Err(err))) => {
                    error!(%worker_type, error = %err, "worker completed with error");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(
                            feed_error!(self.panic_kind, "Worker panicked").with_source(join_err),
                        );
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Deref for WorkerPool {
    type Target = Mutex<WorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_all_aggregates_worker_errors() {
        let pool = WorkerPool::new(ErrorKind::IngestWorkerPanic);

        {
            let mut inner = pool.lock().await;
            inner.spawn(WorkerType::Ingest { worker_id: 0 }, async { Ok(()) });
            inner.spawn(WorkerType::Ingest { worker_id: 1 }, async {
                bail!(ErrorKind::SourceError, "Fetch failed")
            });
            inner.spawn(WorkerType::Ingest { worker_id: 2 }, async {
                bail!(ErrorKind::TransformFailed, "Crop failed")
            });
        }

        let err = pool.wait_all().await.unwrap_err();
        let kinds = err.kinds();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&ErrorKind::SourceError));
        assert!(kinds.contains(&ErrorKind::TransformFailed));
    }

    #[tokio::test]
    async fn running_count_drops_as_workers_finish() {
        let pool = WorkerPool::new(ErrorKind::AugmentWorkerPanic);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        {
            let mut inner = pool.lock().await;
            inner.spawn(WorkerType::Augment { worker_id: 0 }, async move {
                let _ = release_rx.await;
                Ok(())
            });
        }

        assert_eq!(pool.running().await, 1);
        assert_eq!(
            pool.running_workers().await,
            vec![WorkerType::Augment { worker_id: 0 }]
        );

        release_tx.send(()).unwrap();
        pool.wait_all().await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.running().await, 0);
    }

    #[tokio::test]
    async fn panicking_worker_is_classified() {
        let pool = WorkerPool::new(ErrorKind::IngestWorkerPanic);

        {
            let mut inner = pool.lock().await;
            inner.spawn(WorkerType::Ingest { worker_id: 0 }, async {
                panic!("boom")
            });
        }

        let err = pool.wait_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IngestWorkerPanic);
    }
}
