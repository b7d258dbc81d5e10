//! Concurrent staged pipeline that feeds cropped, augmented, shuffled minibatches to a
//! training loop.
//!
//! Raw image batches flow from a [`source::SampleSource`] through a pool of ingest
//! workers into a bounded crop queue, then through a pool of augmentation workers into
//! a randomized shuffle reservoir, from which [`pipeline::Pipeline::next_minibatch`]
//! serves one-hot encoded minibatches. A single coordinator owns startup, a set-once
//! shutdown flag, and a deadlock-free join protocol for every worker.

mod macros;

pub mod concurrency;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod transform;
pub mod types;
pub mod workers;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::PipelineConfig;
pub use error::{ErrorKind, FeedError, FeedResult};
pub use pipeline::Pipeline;
pub use source::SampleSource;
pub use transform::Transform;
pub use types::{CropBox, Minibatch, RawBatch, Sample};
