//! Crop and augmentation transforms.
//!
//! Transforms are pure functions from the pipeline's point of view: cropping is
//! deterministic given its inputs, augmentation is pure given its internal randomness
//! source. The [`Transform`] trait is the seam that lets the pipeline run against any
//! implementation; [`bilinear::BilinearTransform`] is the default.

use ndarray::Array4;

use crate::error::FeedResult;
use crate::types::CropBox;

pub mod bilinear;

pub use bilinear::BilinearTransform;

/// Trait for the two pixel-level transforms the pipeline applies.
pub trait Transform {
    /// Cuts fixed-size square patches out of raw images.
    ///
    /// `images` is laid out `[N, H, W, C]`; each box selects a normalized region of one
    /// image. The output is always exactly `[boxes.len(), box_size, box_size, C]`
    /// regardless of the input image size.
    fn crop(
        &self,
        images: &Array4<f32>,
        boxes: &[CropBox],
        box_size: usize,
    ) -> FeedResult<Array4<f32>>;

    /// Applies randomized augmentation to a batch of crops.
    ///
    /// The batch size and crop shape are preserved; labels are not touched by
    /// augmentation and pass through the pipeline unchanged.
    fn augment(&self, crops: Array4<f32>) -> FeedResult<Array4<f32>>;
}
