//! Configuration objects for the training data pipeline.
//!
//! The layout mirrors the JSON configuration consumed by the training driver: an
//! `image_set` section describing raw images, a `sampling` section describing how crops
//! are drawn, a `queueing` section sizing the staged queues and worker pools, and a
//! `training` section for the consuming loop. No option may be mutated after the
//! pipeline starts; the pipeline takes the config by `Arc`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, FeedResult};

/// Default interval between worker-liveness checks while a minibatch dequeue is blocked.
const DEFAULT_STARVATION_CHECK_MS: u64 = 5000;
/// Default deadline for joining all workers during shutdown.
const DEFAULT_SHUTDOWN_JOIN_TIMEOUT_MS: u64 = 10_000;

fn default_starvation_check_ms() -> u64 {
    DEFAULT_STARVATION_CHECK_MS
}

fn default_shutdown_join_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_JOIN_TIMEOUT_MS
}

/// Shape of the raw images supplied by the sample source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSetConfig {
    /// Height of every raw image, in pixels.
    pub height: usize,
    /// Width of every raw image, in pixels.
    pub width: usize,
    /// Number of channels per pixel.
    pub channels: usize,
}

/// How crops are sampled out of raw images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of whole images fetched from the source per raw batch.
    pub images: usize,
    /// Side length of the square crops cut out of raw images.
    pub box_size: usize,
}

/// Queue capacities and worker pool sizes for the staged pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueingConfig {
    /// Capacity of the FIFO queue holding freshly cropped samples.
    pub crop_queue_size: usize,
    /// Capacity of the randomized reservoir holding augmented samples.
    pub shuffle_queue_size: usize,
    /// Minimum number of buffered samples before the reservoir serves a dequeue.
    pub shuffle_min_size: usize,
    /// Number of ingest workers fetching and cropping raw batches.
    pub ingest_workers: usize,
    /// Number of workers applying augmentation between the two queues.
    pub augmentation_workers: usize,
}

/// Settings of the consuming training loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of samples per training minibatch.
    pub minibatch_size: usize,
    /// Number of training iterations to run.
    pub iterations: usize,
    /// Directory where the external training step persists its checkpoint.
    pub output: PathBuf,
}

/// Top-level configuration for a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub image_set: ImageSetConfig,
    pub sampling: SamplingConfig,
    pub queueing: QueueingConfig,
    pub training: TrainingConfig,
    /// Interval between worker-liveness checks while a minibatch dequeue is blocked.
    #[serde(default = "default_starvation_check_ms")]
    pub starvation_check_ms: u64,
    /// Deadline for joining all workers during shutdown. Workers that miss it are
    /// reported as a warning; shutdown still completes.
    #[serde(default = "default_shutdown_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> FeedResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;

        Ok(config)
    }

    /// Validates the configuration before any queue is built or worker spawned.
    ///
    /// Capacity and threshold violations are fatal at pipeline start; reporting them
    /// here guarantees no worker is ever spawned against an unsatisfiable queue setup.
    pub fn validate(&self) -> FeedResult<()> {
        if self.image_set.height == 0 || self.image_set.width == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Image dimensions must be non-zero",
                format!(
                    "height = {}, width = {}",
                    self.image_set.height, self.image_set.width
                )
            );
        }

        if self.image_set.channels == 0 {
            bail!(ErrorKind::ConfigError, "Channel count must be non-zero");
        }

        if self.sampling.box_size == 0 {
            bail!(ErrorKind::ConfigError, "Crop box size must be non-zero");
        }

        if self.sampling.images == 0 {
            bail!(ErrorKind::ConfigError, "Raw batch size must be non-zero");
        }

        if self.queueing.crop_queue_size == 0 || self.queueing.shuffle_queue_size == 0 {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Queue capacities must be non-zero",
                format!(
                    "crop_queue_size = {}, shuffle_queue_size = {}",
                    self.queueing.crop_queue_size, self.queueing.shuffle_queue_size
                )
            );
        }

        if self.queueing.shuffle_min_size > self.queueing.shuffle_queue_size {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Shuffle queue min fill exceeds its capacity",
                format!(
                    "shuffle_min_size = {}, shuffle_queue_size = {}",
                    self.queueing.shuffle_min_size, self.queueing.shuffle_queue_size
                )
            );
        }

        if self.training.minibatch_size == 0 {
            bail!(ErrorKind::ConfigError, "Minibatch size must be non-zero");
        }

        if self.training.minibatch_size > self.queueing.crop_queue_size {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Minibatch size exceeds crop queue capacity",
                format!(
                    "minibatch_size = {}, crop_queue_size = {}",
                    self.training.minibatch_size, self.queueing.crop_queue_size
                )
            );
        }

        if self.training.minibatch_size > self.queueing.shuffle_queue_size {
            bail!(
                ErrorKind::InvalidQueueConfig,
                "Minibatch size exceeds shuffle queue capacity",
                format!(
                    "minibatch_size = {}, shuffle_queue_size = {}",
                    self.training.minibatch_size, self.queueing.shuffle_queue_size
                )
            );
        }

        if self.queueing.ingest_workers == 0 || self.queueing.augmentation_workers == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Worker pools must have at least one worker",
                format!(
                    "ingest_workers = {}, augmentation_workers = {}",
                    self.queueing.ingest_workers, self.queueing.augmentation_workers
                )
            );
        }

        Ok(())
    }
}
