//! Sample source boundary.
//!
//! The dataset/storage layer lives outside this crate; the pipeline only sees it
//! through the [`SampleSource`] trait.

use std::future::Future;

use crate::error::FeedResult;
use crate::types::RawBatch;

pub mod memory;

/// Trait for systems that supply raw image batches to the pipeline.
///
/// Implementations are called concurrently by every ingest worker, so they must be safe
/// to share. Each `fetch_batch` call consumes new data: no two calls return the same
/// sample within an epoch unless the source wraps around.
pub trait SampleSource {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Returns the number of distinct class labels this source produces.
    ///
    /// Used to size the one-hot label encoding at minibatch assembly time.
    fn num_classes(&self) -> usize;

    /// Fetches the next batch of `batch_size` raw images with their crop boxes and
    /// labels.
    ///
    /// A failure here is a data fault for the calling ingest worker; the source should
    /// not block indefinitely on transient conditions it can report instead.
    fn fetch_batch(&self, batch_size: usize) -> impl Future<Output = FeedResult<RawBatch>> + Send;
}
