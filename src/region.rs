use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array3, Axis};
use tracing::instrument;

use crate::{
    config::{Enhancement, ImageFormat},
    util::{enhance_contrast, enhance_sharpness, image_to_array, slice_to_image, with_color_of},
    Error, Result,
};

/// Pixel rectangle, `max` coordinates exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub const fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub const fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub const fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// Returns `(x, y, width, height)` if the box is non-empty and lies inside
    /// a `width` x `height` image.
    fn within(&self, width: u32, height: u32) -> Result<(u32, u32, u32, u32)> {
        let inside = self.x_min >= 0
            && self.y_min >= 0
            && self.x_max as i64 <= width as i64
            && self.y_max as i64 <= height as i64;
        if !inside || self.width() <= 0 || self.height() <= 0 {
            return Err(Error::InvalidBoundingBox {
                bbox: *self,
                width,
                height,
            });
        }
        Ok((
            self.x_min as u32,
            self.y_min as u32,
            self.width() as u32,
            self.height() as u32,
        ))
    }
}

impl From<(i32, i32, i32, i32)> for BoundingBox {
    fn from((x_min, y_min, x_max, y_max): (i32, i32, i32, i32)) -> Self {
        Self::new(x_min, y_min, x_max, y_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub bbox: BoundingBox,
    pub label: Option<String>,
}

impl Region {
    pub fn new(bbox: impl Into<BoundingBox>) -> Self {
        Self {
            bbox: bbox.into(),
            label: None,
        }
    }

    pub fn labeled(bbox: impl Into<BoundingBox>, label: impl Into<String>) -> Self {
        Self {
            bbox: bbox.into(),
            label: Some(label.into()),
        }
    }
}

/// A loaded image in one of the two supported representations.
#[derive(Debug, Clone)]
pub enum SourceImage {
    /// `(height, width, channel)` array with at least one channel.
    Array(Array3<u8>),
    Image(DynamicImage),
}

impl SourceImage {
    pub fn from_image(image: DynamicImage, format: ImageFormat) -> Self {
        match format {
            ImageFormat::Array => SourceImage::Array(image_to_array(&image)),
            ImageFormat::Image => SourceImage::Image(image),
        }
    }

    pub fn format(&self) -> ImageFormat {
        match self {
            SourceImage::Array(_) => ImageFormat::Array,
            SourceImage::Image(_) => ImageFormat::Image,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SourceImage::Array(array) => {
                let (height, width, _) = array.dim();
                (width as u32, height as u32)
            }
            SourceImage::Image(image) => image.dimensions(),
        }
    }
}

/// A cropped region ready for batch collation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRegion(DynamicImage);

impl NormalizedRegion {
    pub fn image(&self) -> &DynamicImage {
        &self.0
    }

    pub fn into_image(self) -> DynamicImage {
        self.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }
}

/// Crops `bbox` out of `image`.
///
/// The strategy follows the representation:
/// - [`SourceImage::Array`] is sliced rows first (`y_min..y_max`, then
///   `x_min..x_max`) and returned untouched. Arrays are taken to be already
///   preprocessed, so `enhancement` is ignored.
/// - [`SourceImage::Image`] is cropped, resized on both sides by
///   `resize_factor` with a bicubic filter, then sharpened and finally
///   contrast-adjusted. The two enhancements do not commute. Grey and alpha
///   images keep their color type; 16-bit and float images come back as
///   8-bit RGB once enhanced.
#[instrument(level = "trace", skip(image))]
pub fn extract_region(
    image: &SourceImage,
    bbox: &BoundingBox,
    enhancement: &Enhancement,
) -> Result<NormalizedRegion> {
    if let SourceImage::Array(array) = image {
        if array.len_of(Axis(2)) == 0 {
            return Err(Error::InvalidImage(format!(
                "array of shape {:?} has no channels",
                array.shape()
            )));
        }
    }
    let (width, height) = image.dimensions();
    let (x, y, w, h) = bbox.within(width, height)?;

    let region = match image {
        SourceImage::Array(array) => DynamicImage::ImageRgb8(slice_to_image(
            array.view(),
            x as usize,
            y as usize,
            (x + w) as usize,
            (y + h) as usize,
        )),
        SourceImage::Image(image) => enhance(image.crop_imm(x, y, w, h), enhancement),
    };
    Ok(NormalizedRegion(region))
}

fn enhance(part: DynamicImage, enhancement: &Enhancement) -> DynamicImage {
    let Enhancement {
        resize_factor,
        sharpness,
        contrast,
    } = *enhancement;

    let (width, height) = part.dimensions();
    let target_width = ((width as f32 * resize_factor) as u32).max(1);
    let target_height = ((height as f32 * resize_factor) as u32).max(1);
    let part = if (target_width, target_height) == (width, height) {
        part
    } else {
        log::trace!("Resizing region from {width}x{height} to {target_width}x{target_height}");
        part.resize_exact(target_width, target_height, FilterType::CatmullRom)
    };

    if sharpness == 1.0 && contrast == 1.0 {
        return part;
    }
    let rgb = enhance_sharpness(&part.to_rgb8(), sharpness);
    with_color_of(&part, enhance_contrast(&rgb, contrast))
}
