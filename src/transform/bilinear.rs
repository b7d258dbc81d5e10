//! Default transform: bilinear crop-and-resize plus randomized photometric and
//! geometric augmentation.

use ndarray::{Array4, ArrayView3, Axis, s};
use rand::Rng;

use crate::bail;
use crate::error::{ErrorKind, FeedResult};
use crate::transform::Transform;
use crate::types::CropBox;

/// Maximum brightness shift applied during augmentation, in pixel-value units.
const BRIGHTNESS_DELTA: f32 = 0.2;
/// Contrast scaling range applied during augmentation.
const CONTRAST_RANGE: (f32, f32) = (0.8, 1.2);

/// Bilinear crop-and-resize with flip, rotation, and brightness-contrast augmentation.
///
/// Cropping samples the normalized box region of an image on a `box_size x box_size`
/// grid with bilinear interpolation, so the output shape is independent of the input
/// image size. Augmentation applies, independently per crop: an optional horizontal
/// flip, an optional vertical flip, an optional quarter turn, and brightness and
/// contrast jitter.
#[derive(Debug, Clone, Default)]
pub struct BilinearTransform;

impl BilinearTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for BilinearTransform {
    fn crop(
        &self,
        images: &Array4<f32>,
        boxes: &[CropBox],
        box_size: usize,
    ) -> FeedResult<Array4<f32>> {
        if box_size == 0 {
            bail!(ErrorKind::TransformFailed, "Crop box size must be non-zero");
        }

        let (num_images, height, width, channels) = images.dim();
        let mut crops = Array4::<f32>::zeros((boxes.len(), box_size, box_size, channels));

        for (k, cbox) in boxes.iter().enumerate() {
            if cbox.image_index >= num_images {
                bail!(
                    ErrorKind::InvalidBoxCoordinates,
                    "Crop box references an image outside its batch",
                    format!(
                        "image_index = {}, batch holds {num_images} images",
                        cbox.image_index
                    )
                );
            }

            let image = images.index_axis(Axis(0), cbox.image_index);
            let mut crop = crops.index_axis_mut(Axis(0), k);

            // Sampling grid over the normalized box, in source pixel coordinates.
            let y_start = cbox.y0 * (height - 1) as f32;
            let y_end = cbox.y1 * (height - 1) as f32;
            let x_start = cbox.x0 * (width - 1) as f32;
            let x_end = cbox.x1 * (width - 1) as f32;

            for i in 0..box_size {
                for j in 0..box_size {
                    let (y, x) = if box_size > 1 {
                        let ty = i as f32 / (box_size - 1) as f32;
                        let tx = j as f32 / (box_size - 1) as f32;
                        (
                            y_start + ty * (y_end - y_start),
                            x_start + tx * (x_end - x_start),
                        )
                    } else {
                        ((y_start + y_end) / 2.0, (x_start + x_end) / 2.0)
                    };

                    for c in 0..channels {
                        crop[[i, j, c]] = sample_bilinear(&image, y, x, c);
                    }
                }
            }
        }

        Ok(crops)
    }

    fn augment(&self, mut crops: Array4<f32>) -> FeedResult<Array4<f32>> {
        let mut rng = rand::thread_rng();

        for mut crop in crops.axis_iter_mut(Axis(0)) {
            if rng.gen_bool(0.5) {
                let flipped = crop.slice(s![.., ..;-1, ..]).to_owned();
                crop.assign(&flipped);
            }

            if rng.gen_bool(0.5) {
                let flipped = crop.slice(s![..;-1, .., ..]).to_owned();
                crop.assign(&flipped);
            }

            // A quarter turn (transpose then vertical flip) only keeps the shape for
            // square crops.
            let (h, w, _) = crop.dim();
            if h == w && rng.gen_bool(0.5) {
                let transposed = crop.to_owned().permuted_axes([1, 0, 2]);
                crop.assign(&transposed.slice(s![..;-1, .., ..]));
            }

            let delta = rng.gen_range(-BRIGHTNESS_DELTA..=BRIGHTNESS_DELTA);
            let factor = rng.gen_range(CONTRAST_RANGE.0..=CONTRAST_RANGE.1);
            let mean = crop.mean().unwrap_or(0.0);
            crop.mapv_inplace(|v| (v - mean) * factor + mean + delta);
        }

        Ok(crops)
    }
}

/// Bilinear interpolation of one channel at fractional pixel coordinates, clamped to
/// the image bounds.
fn sample_bilinear(image: &ArrayView3<'_, f32>, y: f32, x: f32, c: usize) -> f32 {
    let (height, width, _) = image.dim();

    let y = y.clamp(0.0, (height - 1) as f32);
    let x = x.clamp(0.0, (width - 1) as f32);

    let y_low = y.floor() as usize;
    let x_low = x.floor() as usize;
    let y_high = (y_low + 1).min(height - 1);
    let x_high = (x_low + 1).min(width - 1);

    let y_frac = y - y_low as f32;
    let x_frac = x - x_low as f32;

    let top = image[[y_low, x_low, c]] * (1.0 - x_frac) + image[[y_low, x_high, c]] * x_frac;
    let bottom = image[[y_high, x_low, c]] * (1.0 - x_frac) + image[[y_high, x_high, c]] * x_frac;

    top * (1.0 - y_frac) + bottom * y_frac
}
