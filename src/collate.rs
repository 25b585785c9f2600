use float_ord::FloatOrd;
use image::imageops::FilterType;
use ndarray::{Array4, Axis};
use tracing::instrument;

use crate::{util::subtract_mean_normalize, Error, NormalizedRegion, Result};

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// `[batch, channel, height, width]` input for the recognizer.
pub type AlignedBatch = Array4<f32>;

/// Turns variably sized regions into one uniformly sized tensor.
pub trait BatchCollator {
    fn collate(
        &self,
        regions: &[NormalizedRegion],
        target_height: u32,
        target_width: u32,
        keep_aspect_ratio: bool,
    ) -> Result<AlignedBatch>;
}

/// Resizes every region to a common size and normalizes pixels to `[-1, 1]`.
///
/// When the aspect ratio is kept, the common width is derived from the widest
/// region of the batch instead of `target_width`.
#[derive(Debug, Clone, Copy)]
pub struct AlignCollator {
    pub min_ratio: u32,
    pub max_width: u32,
}

impl Default for AlignCollator {
    fn default() -> Self {
        Self {
            min_ratio: 1,
            max_width: 400,
        }
    }
}

impl AlignCollator {
    fn batch_width(&self, regions: &[NormalizedRegion], height: u32) -> u32 {
        let max_ratio = regions
            .iter()
            .map(|region| {
                let (width, region_height) = region.dimensions();
                FloatOrd(width as f32 / region_height as f32)
            })
            .max()
            .map_or(1.0, |ratio| ratio.0);
        let width = (max_ratio * height as f32).floor() as u32;
        width.max(height * self.min_ratio).min(self.max_width)
    }
}

impl BatchCollator for AlignCollator {
    #[instrument(level = "trace", skip(self, regions), fields(len = regions.len()))]
    fn collate(
        &self,
        regions: &[NormalizedRegion],
        target_height: u32,
        target_width: u32,
        keep_aspect_ratio: bool,
    ) -> Result<AlignedBatch> {
        if regions.is_empty() {
            return Err(Error::Inference("cannot collate an empty batch".into()));
        }
        let width = if keep_aspect_ratio {
            self.batch_width(regions, target_height)
        } else {
            target_width
        };
        log::trace!("Aligning {} regions to {width}x{target_height}", regions.len());

        let tensors = regions
            .iter()
            .map(|region| {
                let image = region
                    .image()
                    .resize_exact(width, target_height, FilterType::Triangle);
                subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES)
            })
            .collect::<Vec<_>>();
        let views = tensors.iter().map(|it| it.view()).collect::<Vec<_>>();

        ndarray::stack(Axis(0), &views).map_err(|err| Error::Inference(err.to_string()))
    }
}
