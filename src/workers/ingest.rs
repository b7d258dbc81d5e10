//! Worker that turns raw image batches into cropped samples.

use std::sync::Arc;

use ndarray::Axis;
use tracing::{debug, info, warn};

use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::config::PipelineConfig;
use crate::error::FeedResult;
use crate::source::SampleSource;
use crate::transform::Transform;
use crate::types::Sample;

/// Worker loop feeding the crop queue.
///
/// Each iteration fetches one raw batch from the sample source, validates it against
/// the configured image shape, crops it into fixed-size samples, and enqueues the
/// whole batch of samples atomically. The loop observes the shutdown flag before each
/// iteration and while blocked on the fetch; a crop queue closed mid-enqueue is the
/// expected shutdown notification and ends the loop quietly.
///
/// Any data fault (malformed batch, bad box coordinates, transform failure) is fatal
/// for this worker only: the loop exits with the error so the pool surfaces it, it is
/// never swallowed.
#[derive(Debug)]
pub struct IngestWorker<S, T> {
    worker_id: usize,
    config: Arc<PipelineConfig>,
    source: Arc<S>,
    transform: Arc<T>,
    crop_queue: Arc<BoundedQueue<Sample>>,
    shutdown_rx: ShutdownRx,
}

impl<S, T> IngestWorker<S, T>
where
    S: SampleSource + Send + Sync + 'static,
    T: Transform + Send + Sync + 'static,
{
    /// Creates a new ingest worker wired to the shared queues and shutdown flag.
    pub fn new(
        worker_id: usize,
        config: Arc<PipelineConfig>,
        source: Arc<S>,
        transform: Arc<T>,
        crop_queue: Arc<BoundedQueue<Sample>>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            config,
            source,
            transform,
            crop_queue,
            shutdown_rx,
        }
    }

    /// Runs the worker loop until shutdown or a data fault.
    pub async fn run(mut self) -> FeedResult<()> {
        info!(worker_id = self.worker_id, "ingest worker started");

        loop {
            if self.shutdown_rx.should_stop() {
                break;
            }

            let fetch = self
                .source
                .fetch_batch(self.config.sampling.images);
            let fetched = tokio::select! {
                _ = self.shutdown_rx.stopped() => ShutdownResult::Shutdown,
                result = fetch => ShutdownResult::Ok(result),
            };

            let raw = match fetched {
                ShutdownResult::Shutdown => break,
                ShutdownResult::Ok(result) => result.inspect_err(|err| {
                    warn!(
                        worker_id = self.worker_id,
                        error = %err,
                        "ingest worker stopping after fetch fault"
                    );
                })?,
            };

            raw.validate(
                self.config.image_set.height,
                self.config.image_set.width,
                self.config.image_set.channels,
            )
            .inspect_err(|err| {
                warn!(
                    worker_id = self.worker_id,
                    error = %err,
                    "ingest worker stopping after data fault"
                );
            })?;

            let crops = self
                .transform
                .crop(&raw.images, &raw.boxes, self.config.sampling.box_size)?;

            let mut samples: Vec<Sample> = crops
                .axis_iter(Axis(0))
                .zip(raw.labels)
                .map(|(crop, label)| Sample {
                    crop: crop.to_owned(),
                    label,
                })
                .collect();

            // A raw batch may yield more crops than the queue can hold at once, so the
            // enqueue is chunked to the queue capacity; each chunk stays atomic.
            let capacity = self.crop_queue.capacity();
            let mut queue_closed = false;
            while !samples.is_empty() {
                let take = samples.len().min(capacity);
                let chunk: Vec<Sample> = samples.drain(..take).collect();

                match self.crop_queue.enqueue_many(chunk).await {
                    Ok(()) => {}
                    Err(err) if err.is_shutdown() => {
                        debug!(
                            worker_id = self.worker_id,
                            "crop queue closed, ingest worker exiting"
                        );
                        queue_closed = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            if queue_closed {
                break;
            }
        }

        info!(worker_id = self.worker_id, "ingest worker stopped");

        Ok(())
    }
}
