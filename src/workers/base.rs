//! Worker classification and per-worker ownership records.

use std::fmt;

use tokio::task::AbortHandle;

/// Classification of pipeline worker types with identifying properties.
///
/// [`WorkerType`] distinguishes the two categories of workers in the pipeline. This is
/// used for logging, liveness accounting, and reporting which workers failed to join
/// during shutdown.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// Worker that fetches raw batches and feeds cropped samples into the crop queue.
    Ingest {
        /// Index of the worker within its pool.
        worker_id: usize,
    },
    /// Worker that augments cropped samples and feeds the shuffle reservoir.
    Augment {
        /// Index of the worker within its pool.
        worker_id: usize,
    },
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::Ingest { worker_id } => write!(f, "ingest-{worker_id}"),
            WorkerType::Augment { worker_id } => write!(f, "augment-{worker_id}"),
        }
    }
}

/// Ownership record pairing a spawned worker task with its join bookkeeping.
///
/// Handles are owned exclusively by the worker pool until shutdown, after which they
/// are retired together with the pool.
#[derive(Debug)]
pub struct WorkerHandle {
    worker_type: WorkerType,
    abort_handle: AbortHandle,
}

impl WorkerHandle {
    /// Creates a new handle for a spawned worker task.
    pub fn new(worker_type: WorkerType, abort_handle: AbortHandle) -> Self {
        Self {
            worker_type,
            abort_handle,
        }
    }

    /// Returns the type of the worker this handle tracks.
    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    /// Checks if the worker task has finished.
    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}
