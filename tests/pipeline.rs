use cropfeed::error::ErrorKind;
use cropfeed::pipeline::Pipeline;
use cropfeed::source::memory::MemorySampleSource;
use cropfeed::test_utils::{init_test_tracing, test_pipeline_config};
use cropfeed::transform::BilinearTransform;

fn test_source(config: &cropfeed::PipelineConfig, num_classes: usize) -> MemorySampleSource {
    MemorySampleSource::new(
        config.image_set.height,
        config.image_set.width,
        config.image_set.channels,
        num_classes,
    )
    .with_boxes_per_image(2)
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_serves_minibatches_end_to_end() {
    init_test_tracing();

    let config = test_pipeline_config();
    let num_classes = 4;
    let source = test_source(&config, num_classes);
    let box_size = config.sampling.box_size;
    let channels = config.image_set.channels;
    let minibatch_size = config.training.minibatch_size;

    let mut pipeline = Pipeline::new(1, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    for _ in 0..10 {
        let minibatch = pipeline.next_minibatch().await.unwrap();

        assert_eq!(
            minibatch.crops.shape(),
            &[minibatch_size, box_size, box_size, channels]
        );
        assert_eq!(minibatch.labels.shape(), &[minibatch_size, num_classes]);

        // Every label row is one-hot.
        for row in minibatch.labels.outer_iter() {
            assert_eq!(row.sum(), 1.0);
            assert!(row.iter().all(|&v| v == 0.0 || v == 1.0));
        }
    }

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn next_minibatch_fails_after_shutdown() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let mut pipeline = Pipeline::new(2, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    pipeline.next_minibatch().await.unwrap();
    pipeline.shutdown().await;

    // The reservoir may still drain buffered samples, but must then fail with the
    // cancellation error rather than block.
    let err = loop {
        match pipeline.next_minibatch().await {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };

    assert_eq!(err.kind(), ErrorKind::QueueClosed);
    assert!(err.is_shutdown());

    pipeline.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_idempotent() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let mut pipeline = Pipeline::new(3, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    pipeline.shutdown().await;
    pipeline.shutdown().await;

    pipeline.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_start_is_a_no_op() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let pipeline = Pipeline::new(4, config, source, BilinearTransform::new());
    pipeline.shutdown().await;
    pipeline.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn source_fault_starves_the_consumer_and_is_surfaced_on_join() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);
    source.fail_after_fetches(0).await;

    let mut pipeline = Pipeline::new(5, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    // The only ingest worker dies on its first fetch, so the consumer can never be
    // served and must fail instead of hanging.
    let err = pipeline.next_minibatch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PipelineStarved);

    let err = pipeline.shutdown_and_wait().await.unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::SourceError));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_batch_is_surfaced_on_join() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);
    source.emit_bad_shape_after(0).await;

    let mut pipeline = Pipeline::new(6, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    let err = pipeline.next_minibatch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PipelineStarved);

    let err = pipeline.shutdown_and_wait().await.unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::InvalidBatchShape));
}

#[tokio::test(flavor = "multi_thread")]
async fn next_minibatch_requires_start() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let pipeline = Pipeline::new(7, config, source, BilinearTransform::new());
    let err = pipeline.next_minibatch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_is_rejected() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let mut pipeline = Pipeline::new(8, config, source, BilinearTransform::new());
    pipeline.start().await.unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_fails_start_before_spawning() {
    init_test_tracing();

    let mut config = test_pipeline_config();
    config.queueing.shuffle_min_size = config.queueing.shuffle_queue_size + 1;
    let source = test_source(&config, 4);

    let mut pipeline = Pipeline::new(9, config, source, BilinearTransform::new());
    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQueueConfig);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn training_loop_runs_all_iterations_and_stops() {
    init_test_tracing();

    let mut config = test_pipeline_config();
    config.training.iterations = 8;
    let minibatch_size = config.training.minibatch_size;
    let source = test_source(&config, 4);

    let pipeline = Pipeline::new(10, config, source, BilinearTransform::new());

    let mut steps = 0;
    pipeline
        .run_training_loop(|minibatch| {
            assert_eq!(minibatch.len(), minibatch_size);
            steps += 1;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(steps, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn training_loop_stops_on_step_error() {
    init_test_tracing();

    let config = test_pipeline_config();
    let source = test_source(&config, 4);

    let pipeline = Pipeline::new(11, config, source, BilinearTransform::new());

    let mut steps = 0;
    let err = pipeline
        .run_training_loop(|_minibatch| {
            steps += 1;
            if steps == 2 {
                cropfeed::bail!(ErrorKind::Unknown, "Training step failed")
            }
            Ok(())
        })
        .await
        .unwrap_err();

    assert_eq!(steps, 2);
    assert!(err.kinds().contains(&ErrorKind::Unknown));
}

#[tokio::test(flavor = "multi_thread")]
async fn lagging_worker_does_not_block_shutdown() {
    init_test_tracing();

    /// Crops normally but stalls its thread inside augmentation, simulating a worker
    /// that cannot observe shutdown in time.
    #[derive(Debug, Clone)]
    struct StallingTransform;

    impl cropfeed::Transform for StallingTransform {
        fn crop(
            &self,
            images: &ndarray::Array4<f32>,
            boxes: &[cropfeed::CropBox],
            box_size: usize,
        ) -> cropfeed::FeedResult<ndarray::Array4<f32>> {
            BilinearTransform::new().crop(images, boxes, box_size)
        }

        fn augment(
            &self,
            crops: ndarray::Array4<f32>,
        ) -> cropfeed::FeedResult<ndarray::Array4<f32>> {
            std::thread::sleep(std::time::Duration::from_secs(1));
            Ok(crops)
        }
    }

    let mut config = test_pipeline_config();
    config.shutdown_join_timeout_ms = 200;
    let source = test_source(&config, 4);

    let mut pipeline = Pipeline::new(13, config, source, StallingTransform);
    pipeline.start().await.unwrap();

    // Let the augmentation worker enter its stall before requesting stop.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    pipeline.shutdown_and_wait().await.unwrap();

    // The join deadline bounds the wait; the stalled worker is reported, not awaited.
    assert!(started.elapsed() < std::time::Duration::from_millis(800));
}

#[tokio::test(flavor = "multi_thread")]
async fn external_shutdown_request_ends_the_training_loop() {
    init_test_tracing();

    let mut config = test_pipeline_config();
    config.training.iterations = 1_000_000;
    let source = test_source(&config, 4);

    let pipeline = Pipeline::new(12, config, source, BilinearTransform::new());
    let shutdown_tx = pipeline.shutdown_tx();

    let driver = tokio::spawn(async move {
        pipeline
            .run_training_loop(|_minibatch| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                Ok(())
            })
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    shutdown_tx.shutdown();

    // The loop observes the flag between iterations and winds the pipeline down.
    let result = driver.await.unwrap();
    result.unwrap();
}
