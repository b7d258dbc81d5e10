//! Worker that augments cropped samples and feeds the shuffle reservoir.

use std::sync::Arc;

use ndarray::{Array4, Axis};
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shuffle::ShuffleQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, FeedResult};
use crate::transform::Transform;
use crate::types::Sample;

/// Worker loop between the crop queue and the shuffle reservoir.
///
/// Each iteration dequeues a minibatch-sized group of samples from the crop queue,
/// applies the randomized augmentation transform to the crop tensor (labels pass
/// through unchanged), and enqueues the result into the reservoir. Workers partition
/// the crop queue: each dequeues its own disjoint group, so the reservoir mixes
/// outputs from many independent augmentation passes.
///
/// A closed or drained queue on either side is the expected shutdown notification and
/// ends the loop quietly; a transform failure is fatal for this worker and surfaced
/// through the pool.
#[derive(Debug)]
pub struct AugmentWorker<T> {
    worker_id: usize,
    config: Arc<PipelineConfig>,
    transform: Arc<T>,
    crop_queue: Arc<BoundedQueue<Sample>>,
    shuffle_queue: Arc<ShuffleQueue<Sample>>,
    shutdown_rx: ShutdownRx,
}

impl<T> AugmentWorker<T>
where
    T: Transform + Send + Sync + 'static,
{
    /// Creates a new augmentation worker wired to the shared queues and shutdown flag.
    pub fn new(
        worker_id: usize,
        config: Arc<PipelineConfig>,
        transform: Arc<T>,
        crop_queue: Arc<BoundedQueue<Sample>>,
        shuffle_queue: Arc<ShuffleQueue<Sample>>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            config,
            transform,
            crop_queue,
            shuffle_queue,
            shutdown_rx,
        }
    }

    /// Runs the worker loop until shutdown or a transform fault.
    pub async fn run(mut self) -> FeedResult<()> {
        info!(worker_id = self.worker_id, "augmentation worker started");

        let group_size = self.config.training.minibatch_size;

        loop {
            if self.shutdown_rx.should_stop() {
                break;
            }

            let dequeue = self.crop_queue.dequeue_many(group_size);
            let dequeued = tokio::select! {
                _ = self.shutdown_rx.stopped() => ShutdownResult::Shutdown,
                result = dequeue => ShutdownResult::Ok(result),
            };

            let samples = match dequeued {
                ShutdownResult::Shutdown => break,
                ShutdownResult::Ok(Ok(samples)) => samples,
                ShutdownResult::Ok(Err(err)) if err.is_shutdown() => {
                    debug!(
                        worker_id = self.worker_id,
                        "crop queue drained, augmentation worker exiting"
                    );
                    break;
                }
                ShutdownResult::Ok(Err(err)) => return Err(err),
            };

            let (crops, labels) = stack_samples(samples)?;
            let augmented = self.transform.augment(crops).inspect_err(|err| {
                warn!(
                    worker_id = self.worker_id,
                    error = %err,
                    "augmentation worker stopping after transform fault"
                );
            })?;

            let samples: Vec<Sample> = augmented
                .axis_iter(Axis(0))
                .zip(labels)
                .map(|(crop, label)| Sample {
                    crop: crop.to_owned(),
                    label,
                })
                .collect();

            match self.shuffle_queue.enqueue_many(samples).await {
                Ok(()) => {}
                Err(err) if err.is_shutdown() => {
                    debug!(
                        worker_id = self.worker_id,
                        "shuffle queue closed, augmentation worker exiting"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        info!(worker_id = self.worker_id, "augmentation worker stopped");

        Ok(())
    }
}

/// Stacks samples into one `[n, box, box, channels]` tensor plus their labels.
fn stack_samples(samples: Vec<Sample>) -> FeedResult<(Array4<f32>, Vec<u32>)> {
    let Some(first) = samples.first() else {
        bail!(
            ErrorKind::InvalidState,
            "Cannot stack an empty group of samples"
        );
    };

    let (box_h, box_w, channels) = first.crop.dim();
    let mut crops = Array4::<f32>::zeros((samples.len(), box_h, box_w, channels));
    let mut labels = Vec::with_capacity(samples.len());

    for (i, sample) in samples.into_iter().enumerate() {
        if sample.crop.dim() != (box_h, box_w, channels) {
            bail!(
                ErrorKind::InvalidBatchShape,
                "Sample crop shape differs within a group",
                format!(
                    "expected {:?}, got {:?}",
                    (box_h, box_w, channels),
                    sample.crop.dim()
                )
            );
        }

        crops.index_axis_mut(Axis(0), i).assign(&sample.crop);
        labels.push(sample.label);
    }

    Ok((crops, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn stack_samples_preserves_order_and_labels() {
        let samples = vec![
            Sample {
                crop: Array3::from_elem((2, 2, 1), 1.0),
                label: 3,
            },
            Sample {
                crop: Array3::from_elem((2, 2, 1), 2.0),
                label: 1,
            },
        ];

        let (crops, labels) = stack_samples(samples).unwrap();
        assert_eq!(crops.shape(), &[2, 2, 2, 1]);
        assert_eq!(labels, vec![3, 1]);
        assert_eq!(crops[[0, 0, 0, 0]], 1.0);
        assert_eq!(crops[[1, 0, 0, 0]], 2.0);
    }

    #[test]
    fn stack_samples_rejects_mixed_shapes() {
        let samples = vec![
            Sample {
                crop: Array3::zeros((2, 2, 1)),
                label: 0,
            },
            Sample {
                crop: Array3::zeros((3, 3, 1)),
                label: 0,
            },
        ];

        let err = stack_samples(samples).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBatchShape);
    }
}
