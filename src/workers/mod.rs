//! Worker pools for the staged pipeline.
//!
//! Two pools of persistent worker loops move data through the queues: ingest workers
//! turn raw batches into cropped samples, augmentation workers move samples from the
//! crop queue into the shuffle reservoir. Pools own the join protocol; workers observe
//! the shared shutdown flag before each unit of work and treat a closed queue as an
//! expected stop notification.

pub mod augment;
pub mod base;
pub mod ingest;
pub mod pool;
