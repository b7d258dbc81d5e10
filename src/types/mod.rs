//! Core data types moved through the pipeline stages.

use ndarray::{Array2, Array3, Array4};

use crate::bail;
use crate::error::{ErrorKind, FeedResult};

/// Unique identifier for a pipeline instance.
pub type PipelineId = u64;

/// One crop region inside a raw image batch.
///
/// Coordinates are normalized to `[0, 1]` with `(y0, x0)` the top-left and `(y1, x1)` the
/// bottom-right corner, matching the box layout produced by the dataset's box preparation
/// step. `image_index` selects the image within the batch the box belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropBox {
    pub image_index: usize,
    pub y0: f32,
    pub x0: f32,
    pub y1: f32,
    pub x1: f32,
}

impl CropBox {
    /// Validates the box against the number of images in its batch.
    ///
    /// Out-of-range coordinates or a dangling image index are data faults: the sample
    /// source handed us a box we cannot crop.
    pub fn validate(&self, num_images: usize) -> FeedResult<()> {
        if self.image_index >= num_images {
            bail!(
                ErrorKind::InvalidBoxCoordinates,
                "Crop box references an image outside its batch",
                format!(
                    "image_index = {}, batch holds {} images",
                    self.image_index, num_images
                )
            );
        }

        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.y0) && in_unit(self.x0) && in_unit(self.y1) && in_unit(self.x1)) {
            bail!(
                ErrorKind::InvalidBoxCoordinates,
                "Crop box coordinates outside the unit square",
                format!("box = {self:?}")
            );
        }

        if self.y0 > self.y1 || self.x0 > self.x1 {
            bail!(
                ErrorKind::InvalidBoxCoordinates,
                "Crop box corners are inverted",
                format!("box = {self:?}")
            );
        }

        Ok(())
    }
}

/// A batch of whole images with their crop boxes and labels.
///
/// Produced by a [`crate::source::SampleSource`] and consumed exactly once by a single
/// ingest worker. `boxes[i]` pairs with `labels[i]`; each image may contribute any number
/// of boxes, including zero.
#[derive(Debug, Clone)]
pub struct RawBatch {
    /// Raw images, laid out `[images, height, width, channels]`.
    pub images: Array4<f32>,
    /// Crop regions into `images`.
    pub boxes: Vec<CropBox>,
    /// Class label per crop box.
    pub labels: Vec<u32>,
}

impl RawBatch {
    /// Validates the batch against the expected raw image shape.
    ///
    /// The pipeline's crop shape is invariant for its whole lifetime, so a batch with an
    /// unexpected image shape or misaligned box/label arrays is rejected before cropping.
    pub fn validate(&self, height: usize, width: usize, channels: usize) -> FeedResult<()> {
        let shape = self.images.shape();
        if shape[1] != height || shape[2] != width || shape[3] != channels {
            bail!(
                ErrorKind::InvalidBatchShape,
                "Raw batch image shape mismatch",
                format!(
                    "expected [_, {height}, {width}, {channels}], got {:?}",
                    shape
                )
            );
        }

        if self.boxes.len() != self.labels.len() {
            bail!(
                ErrorKind::InvalidBatchShape,
                "Box and label counts differ",
                format!(
                    "{} boxes vs {} labels",
                    self.boxes.len(),
                    self.labels.len()
                )
            );
        }

        let num_images = shape[0];
        for cbox in &self.boxes {
            cbox.validate(num_images)?;
        }

        Ok(())
    }
}

/// One labeled crop: the unit moved through both queues.
///
/// The crop tensor has the fixed shape `[box_size, box_size, channels]` from the moment
/// it leaves the crop transform until it is batched into a minibatch.
#[derive(Debug, Clone)]
pub struct Sample {
    pub crop: Array3<f32>,
    pub label: u32,
}

/// A fixed-size group of samples handed to one training step.
#[derive(Debug, Clone)]
pub struct Minibatch {
    /// Crops batched along the first axis, `[n, box_size, box_size, channels]`.
    pub crops: Array4<f32>,
    /// One-hot encoded labels, `[n, num_classes]`.
    pub labels: Array2<f32>,
}

impl Minibatch {
    /// Assembles a minibatch from samples, one-hot encoding labels over `num_classes`.
    pub fn from_samples(samples: Vec<Sample>, num_classes: usize) -> FeedResult<Self> {
        if samples.is_empty() {
            bail!(
                ErrorKind::InvalidState,
                "Cannot assemble a minibatch from zero samples"
            );
        }

        let crop_shape = samples[0].crop.dim();
        let (box_h, box_w, channels) = crop_shape;

        let mut crops = Array4::<f32>::zeros((samples.len(), box_h, box_w, channels));
        let mut labels = Array2::<f32>::zeros((samples.len(), num_classes));

        for (i, sample) in samples.into_iter().enumerate() {
            if sample.crop.dim() != crop_shape {
                bail!(
                    ErrorKind::InvalidBatchShape,
                    "Sample crop shape differs within a minibatch",
                    format!("expected {crop_shape:?}, got {:?}", sample.crop.dim())
                );
            }

            let label = sample.label as usize;
            if label >= num_classes {
                bail!(
                    ErrorKind::InvalidBatchShape,
                    "Sample label outside the class range",
                    format!("label = {label}, num_classes = {num_classes}")
                );
            }

            crops.index_axis_mut(ndarray::Axis(0), i).assign(&sample.crop);
            labels[[i, label]] = 1.0;
        }

        Ok(Minibatch { crops, labels })
    }

    /// Number of samples in this minibatch.
    pub fn len(&self) -> usize {
        self.crops.shape()[0]
    }

    /// Returns `true` if the minibatch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample(label: u32) -> Sample {
        Sample {
            crop: Array3::from_elem((4, 4, 2), label as f32),
            label,
        }
    }

    #[test]
    fn minibatch_one_hot_encodes_labels() {
        let batch = Minibatch::from_samples(vec![sample(0), sample(2)], 3).unwrap();

        assert_eq!(batch.crops.shape(), &[2, 4, 4, 2]);
        assert_eq!(batch.labels.shape(), &[2, 3]);
        assert_eq!(batch.labels[[0, 0]], 1.0);
        assert_eq!(batch.labels[[0, 1]], 0.0);
        assert_eq!(batch.labels[[1, 2]], 1.0);
    }

    #[test]
    fn minibatch_rejects_label_out_of_range() {
        let err = Minibatch::from_samples(vec![sample(5)], 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBatchShape);
    }

    #[test]
    fn crop_box_rejects_out_of_unit_coordinates() {
        let cbox = CropBox {
            image_index: 0,
            y0: -0.1,
            x0: 0.0,
            y1: 0.5,
            x1: 0.5,
        };
        let err = cbox.validate(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBoxCoordinates);
    }

    #[test]
    fn crop_box_rejects_dangling_image_index() {
        let cbox = CropBox {
            image_index: 3,
            y0: 0.0,
            x0: 0.0,
            y1: 1.0,
            x1: 1.0,
        };
        let err = cbox.validate(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBoxCoordinates);
    }

    #[test]
    fn raw_batch_rejects_shape_mismatch() {
        let batch = RawBatch {
            images: Array4::zeros((1, 8, 8, 1)),
            boxes: vec![],
            labels: vec![],
        };
        let err = batch.validate(8, 8, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBatchShape);
    }
}
