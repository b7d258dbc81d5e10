//! Shared helpers for unit and integration tests.

use std::path::PathBuf;

use crate::config::{
    ImageSetConfig, PipelineConfig, QueueingConfig, SamplingConfig, TrainingConfig,
};

/// Initializes tracing output for a test, once per process.
///
/// Honors `RUST_LOG` when set and stays quiet otherwise, so failing tests can be
/// rerun with full pipeline logs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A small but fully valid pipeline configuration.
///
/// Sized so an end-to-end run over a synthetic source finishes quickly: one worker
/// per pool, short queues, and aggressive starvation and shutdown deadlines.
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        image_set: ImageSetConfig {
            height: 16,
            width: 16,
            channels: 3,
        },
        sampling: SamplingConfig {
            images: 2,
            box_size: 8,
        },
        queueing: QueueingConfig {
            crop_queue_size: 8,
            shuffle_queue_size: 16,
            shuffle_min_size: 4,
            ingest_workers: 1,
            augmentation_workers: 1,
        },
        training: TrainingConfig {
            minibatch_size: 2,
            iterations: 5,
            output: PathBuf::from("/tmp/cropfeed-test"),
        },
        starvation_check_ms: 200,
        shutdown_join_timeout_ms: 2000,
    }
}
