//! In-memory sample source for testing and development purposes.

use std::sync::Arc;

use ndarray::Array4;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, FeedResult};
use crate::feed_error;
use crate::source::SampleSource;
use crate::types::{CropBox, RawBatch};

#[derive(Debug)]
struct Inner {
    fetches: usize,
    fail_after: Option<usize>,
    bad_shape_after: Option<usize>,
}

/// Synthetic [`SampleSource`] that fabricates image batches in memory.
///
/// Images are deterministic gradients, every image carries a configurable number of
/// centered crop boxes, and labels cycle through the class range. Failures can be
/// scripted to exercise the pipeline's fault paths: after a configured number of
/// successful fetches the source either errors or emits batches with a wrong channel
/// count.
#[derive(Debug, Clone)]
pub struct MemorySampleSource {
    height: usize,
    width: usize,
    channels: usize,
    num_classes: usize,
    boxes_per_image: usize,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySampleSource {
    /// Creates a source producing images of the given shape over `num_classes` labels.
    pub fn new(height: usize, width: usize, channels: usize, num_classes: usize) -> Self {
        Self {
            height,
            width,
            channels,
            num_classes,
            boxes_per_image: 1,
            inner: Arc::new(Mutex::new(Inner {
                fetches: 0,
                fail_after: None,
                bad_shape_after: None,
            })),
        }
    }

    /// Sets how many crop boxes each image contributes.
    pub fn with_boxes_per_image(mut self, boxes_per_image: usize) -> Self {
        self.boxes_per_image = boxes_per_image;
        self
    }

    /// Scripts a fetch error after `fetches` successful fetches.
    pub async fn fail_after_fetches(&self, fetches: usize) {
        self.inner.lock().await.fail_after = Some(fetches);
    }

    /// Scripts malformed batches (wrong channel count) after `fetches` successful
    /// fetches.
    pub async fn emit_bad_shape_after(&self, fetches: usize) {
        self.inner.lock().await.bad_shape_after = Some(fetches);
    }

    /// Returns the number of fetch calls served so far, including scripted failures.
    pub async fn fetches(&self) -> usize {
        self.inner.lock().await.fetches
    }

    fn build_batch(&self, batch_size: usize, channels: usize) -> RawBatch {
        let mut images = Array4::<f32>::zeros((batch_size, self.height, self.width, channels));
        for (n, mut image) in images.outer_iter_mut().enumerate() {
            let base = n as f32;
            for ((y, x, c), value) in image.indexed_iter_mut() {
                *value = base + (y + x + c) as f32 / (self.height + self.width) as f32;
            }
        }

        let mut boxes = Vec::with_capacity(batch_size * self.boxes_per_image);
        let mut labels = Vec::with_capacity(batch_size * self.boxes_per_image);
        for image_index in 0..batch_size {
            for b in 0..self.boxes_per_image {
                let inset = 0.1 + 0.05 * b as f32;
                boxes.push(CropBox {
                    image_index,
                    y0: inset.min(0.5),
                    x0: inset.min(0.5),
                    y1: (1.0 - inset).max(0.5),
                    x1: (1.0 - inset).max(0.5),
                });
                labels.push(((image_index + b) % self.num_classes) as u32);
            }
        }

        RawBatch {
            images,
            boxes,
            labels,
        }
    }
}

impl SampleSource for MemorySampleSource {
    fn name() -> &'static str {
        "memory"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    async fn fetch_batch(&self, batch_size: usize) -> FeedResult<RawBatch> {
        let channels = {
            let mut inner = self.inner.lock().await;
            let served = inner.fetches;
            inner.fetches += 1;

            if let Some(fail_after) = inner.fail_after
                && served >= fail_after
            {
                return Err(feed_error!(
                    ErrorKind::SourceError,
                    "Scripted fetch failure",
                    format!("fetch #{served}")
                ));
            }

            match inner.bad_shape_after {
                Some(bad_after) if served >= bad_after => self.channels + 1,
                _ => self.channels,
            }
        };

        Ok(self.build_batch(batch_size, channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_aligned_boxes_and_labels() {
        let source = MemorySampleSource::new(16, 16, 3, 4).with_boxes_per_image(2);

        let batch = source.fetch_batch(3).await.unwrap();
        assert_eq!(batch.images.shape(), &[3, 16, 16, 3]);
        assert_eq!(batch.boxes.len(), 6);
        assert_eq!(batch.labels.len(), 6);
        batch.validate(16, 16, 3).unwrap();
        assert!(batch.labels.iter().all(|&l| l < 4));
    }

    #[tokio::test]
    async fn scripted_failure_triggers_after_threshold() {
        let source = MemorySampleSource::new(8, 8, 1, 2);
        source.fail_after_fetches(1).await;

        source.fetch_batch(1).await.unwrap();
        let err = source.fetch_batch(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceError);
        assert_eq!(source.fetches().await, 2);
    }

    #[tokio::test]
    async fn scripted_bad_shape_fails_validation() {
        let source = MemorySampleSource::new(8, 8, 1, 2);
        source.emit_bad_shape_after(0).await;

        let batch = source.fetch_batch(1).await.unwrap();
        let err = batch.validate(8, 8, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBatchShape);
    }
}
