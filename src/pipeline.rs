//! Pipeline coordination: queue construction, worker spawning, minibatch consumption,
//! and the coordinated-shutdown protocol.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, info, warn};

use crate::bail;
use crate::concurrency::queue::BoundedQueue;
use crate::concurrency::shuffle::ShuffleQueue;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, FeedError, FeedResult};
use crate::source::SampleSource;
use crate::transform::Transform;
use crate::types::{Minibatch, PipelineId, Sample};
use crate::workers::augment::AugmentWorker;
use crate::workers::base::WorkerType;
use crate::workers::ingest::IngestWorker;
use crate::workers::pool::WorkerPool;

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        crop_queue: Arc<BoundedQueue<Sample>>,
        shuffle_queue: Arc<ShuffleQueue<Sample>>,
        ingest_pool: WorkerPool,
        augment_pool: WorkerPool,
    },
}

/// The staged training-data pipeline.
///
/// [`Pipeline`] owns the single shutdown flag every worker observes, the bookkeeping
/// needed to join every worker, and the consumption side handed to the training loop.
/// Data flows source -> ingest workers -> crop queue -> augmentation workers ->
/// shuffle reservoir -> [`Pipeline::next_minibatch`].
#[derive(Debug)]
pub struct Pipeline<S, T> {
    id: PipelineId,
    config: Arc<PipelineConfig>,
    source: Arc<S>,
    transform: Arc<T>,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<S, T> Pipeline<S, T>
where
    S: SampleSource + Send + Sync + 'static,
    T: Transform + Send + Sync + 'static,
{
    /// Creates a pipeline in the not-started state.
    ///
    /// The configuration is frozen here; no option is read back mutably after start.
    pub fn new(id: PipelineId, config: PipelineConfig, source: S, transform: T) -> Self {
        // Watch channel used purely to notify all workers that shutdown is needed;
        // receivers are extracted from the transmitter via subscribe at spawn time.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            id,
            config: Arc::new(config),
            source: Arc::new(source),
            transform: Arc::new(transform),
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Returns a clone of the shutdown transmitter, usable to request stop from
    /// another task.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Validates the configuration, builds both queues, and spawns both worker pools.
    ///
    /// Capacity and threshold violations are reported here, before any worker is
    /// spawned. Returns as soon as every worker task is launched; it does not wait for
    /// the shuffle reservoir to reach its min fill.
    pub async fn start(&mut self) -> FeedResult<()> {
        if let PipelineState::Started { .. } = self.state {
            bail!(ErrorKind::InvalidState, "Pipeline was already started");
        }

        info!(pipeline_id = self.id, source = S::name(), "starting pipeline");

        self.config.validate()?;

        let crop_queue = Arc::new(BoundedQueue::new(self.config.queueing.crop_queue_size)?);
        let shuffle_queue = Arc::new(ShuffleQueue::new(
            self.config.queueing.shuffle_queue_size,
            self.config.queueing.shuffle_min_size,
        )?);

        let ingest_pool = WorkerPool::new(ErrorKind::IngestWorkerPanic);
        let augment_pool = WorkerPool::new(ErrorKind::AugmentWorkerPanic);

        for worker_id in 0..self.config.queueing.ingest_workers {
            let worker = IngestWorker::new(
                worker_id,
                self.config.clone(),
                self.source.clone(),
                self.transform.clone(),
                crop_queue.clone(),
                self.shutdown_tx.subscribe(),
            );

            let span = tracing::info_span!("ingest_worker", pipeline_id = self.id, worker_id);
            let mut inner = ingest_pool.lock().await;
            inner.spawn(WorkerType::Ingest { worker_id }, worker.run().instrument(span));
        }

        for worker_id in 0..self.config.queueing.augmentation_workers {
            let worker = AugmentWorker::new(
                worker_id,
                self.config.clone(),
                self.transform.clone(),
                crop_queue.clone(),
                shuffle_queue.clone(),
                self.shutdown_tx.subscribe(),
            );

            let span = tracing::info_span!("augment_worker", pipeline_id = self.id, worker_id);
            let mut inner = augment_pool.lock().await;
            inner.spawn(WorkerType::Augment { worker_id }, worker.run().instrument(span));
        }

        self.state = PipelineState::Started {
            crop_queue,
            shuffle_queue,
            ingest_pool,
            augment_pool,
        };

        info!(
            pipeline_id = self.id,
            ingest_workers = self.config.queueing.ingest_workers,
            augmentation_workers = self.config.queueing.augmentation_workers,
            "pipeline started"
        );

        Ok(())
    }

    /// Dequeues one minibatch from the shuffle reservoir and one-hot encodes its
    /// labels.
    ///
    /// Blocks under the reservoir's min-fill rule. While blocked, worker liveness is
    /// checked every `starvation_check_ms`: if a pool has no running workers left, no
    /// new samples can ever arrive and the call fails with
    /// [`ErrorKind::PipelineStarved`] instead of hanging forever. After shutdown the
    /// call fails with [`ErrorKind::QueueClosed`].
    pub async fn next_minibatch(&self) -> FeedResult<Minibatch> {
        let PipelineState::Started {
            shuffle_queue,
            ingest_pool,
            augment_pool,
            ..
        } = &self.state
        else {
            bail!(ErrorKind::InvalidState, "Pipeline was not started");
        };

        let minibatch_size = self.config.training.minibatch_size;
        let check_interval = Duration::from_millis(self.config.starvation_check_ms);

        loop {
            match tokio::time::timeout(check_interval, shuffle_queue.dequeue_many(minibatch_size))
                .await
            {
                Ok(result) => {
                    let samples = result?;
                    return Minibatch::from_samples(samples, self.source.num_classes());
                }
                Err(_elapsed) => {
                    let ingest_running = ingest_pool.running().await;
                    let augment_running = augment_pool.running().await;

                    if ingest_running == 0 || augment_running == 0 {
                        bail!(
                            ErrorKind::PipelineStarved,
                            "Minibatch dequeue stalled with a dead worker pool",
                            format!(
                                "ingest workers running = {ingest_running}, \
                                 augmentation workers running = {augment_running}"
                            )
                        );
                    }

                    let buffered = shuffle_queue.len().await;
                    debug!(
                        pipeline_id = self.id,
                        buffered, "minibatch dequeue still blocked, workers alive"
                    );
                }
            }
        }
    }

    /// Requests stop and closes both queues, cancelling every blocked queue operation.
    ///
    /// Idempotent, and callable even if `start` failed partway: with no queues built
    /// this only flips the shutdown flag. Workers unblock with a close notification
    /// rather than waiting for their next poll.
    pub async fn shutdown(&self) {
        info!(pipeline_id = self.id, "shutting down pipeline");

        self.shutdown_tx.shutdown();

        if let PipelineState::Started {
            crop_queue,
            shuffle_queue,
            ..
        } = &self.state
        {
            crop_queue.close().await;
            shuffle_queue.close().await;
        }
    }

    /// Joins every worker, waiting up to the configured shutdown deadline.
    ///
    /// Worker data faults are aggregated and returned for visibility. Workers that
    /// fail to join within the deadline are reported as a warning; the shutdown still
    /// completes since nothing downstream waits on them once the pipeline is retired.
    pub async fn wait(self) -> FeedResult<()> {
        let PipelineState::Started {
            ingest_pool,
            augment_pool,
            ..
        } = self.state
        else {
            info!(
                pipeline_id = self.id,
                "pipeline was not started, nothing to wait for"
            );

            return Ok(());
        };

        let deadline = Duration::from_millis(self.config.shutdown_join_timeout_ms);
        let mut errors: Vec<FeedError> = Vec::new();

        let joined = tokio::time::timeout(deadline, async {
            let ingest_result = ingest_pool.wait_all().await;
            let augment_result = augment_pool.wait_all().await;
            (ingest_result, augment_result)
        })
        .await;

        match joined {
            Ok((ingest_result, augment_result)) => {
                if let Err(err) = ingest_result {
                    errors.push(err);
                }
                if let Err(err) = augment_result {
                    errors.push(err);
                }
            }
            Err(_elapsed) => {
                let mut lagging = ingest_pool.running_workers().await;
                lagging.extend(augment_pool.running_workers().await);
                let lagging: Vec<String> = lagging.iter().map(ToString::to_string).collect();

                warn!(
                    pipeline_id = self.id,
                    workers = ?lagging,
                    "workers failed to join within the shutdown deadline"
                );
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!(pipeline_id = self.id, "pipeline stopped");

        Ok(())
    }

    /// Requests stop, closes the queues, and joins every worker.
    pub async fn shutdown_and_wait(self) -> FeedResult<()> {
        self.shutdown().await;
        self.wait().await
    }

    /// Runs the full training lifecycle: start, iterate, stop.
    ///
    /// Calls `step` with one minibatch per configured training iteration, then shuts
    /// the pipeline down on both the success and the failure path. Checkpoint
    /// persistence belongs to the external training step; the configured output path
    /// is available to it through the config.
    pub async fn run_training_loop<F>(mut self, mut step: F) -> FeedResult<()>
    where
        F: FnMut(Minibatch) -> FeedResult<()>,
    {
        if let Err(err) = self.start().await {
            // Best-effort cleanup of whatever start managed to build.
            self.shutdown_and_wait().await.ok();
            return Err(err);
        }

        let iterations = self.config.training.iterations;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut loop_result: FeedResult<()> = Ok(());

        for iteration in 0..iterations {
            if shutdown_rx.should_stop() {
                info!(
                    pipeline_id = self.id,
                    iteration, "stop requested, ending training loop"
                );
                break;
            }

            let step_result = tokio::select! {
                _ = shutdown_rx.stopped() => {
                    info!(
                        pipeline_id = self.id,
                        iteration, "stop requested, ending training loop"
                    );
                    break;
                }
                result = self.next_minibatch() => match result {
                    Ok(minibatch) => step(minibatch),
                    Err(err) => Err(err),
                },
            };

            if let Err(err) = step_result {
                loop_result = Err(err);
                break;
            }

            if iteration % 100 == 0 {
                debug!(pipeline_id = self.id, iteration, "training progress");
            }
        }

        let shutdown_result = self.shutdown_and_wait().await;

        match (loop_result, shutdown_result) {
            (Ok(()), result) => result,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(shutdown_err)) => Err(vec![err, shutdown_err].into()),
        }
    }
}
