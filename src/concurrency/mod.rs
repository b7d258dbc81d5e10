//! Concurrency utilities for coordinating the staged data pipeline.
//!
//! This module provides the primitives the pipeline is built on: a broadcast shutdown
//! channel observed by every worker, a bounded FIFO queue with blocking batch operations,
//! and a randomized reservoir queue with a minimum-fill precondition.
//!
//! All synchronization is encapsulated inside the queue implementations; no caller ever
//! holds a queue lock across a blocking call into another component. Shutdown is
//! cooperative: a blocked queue operation unblocks with a close notification the moment
//! its queue is closed, rather than on its next poll.

pub mod queue;
pub mod shuffle;
pub mod shutdown;
