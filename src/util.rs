use image::{
    imageops, DynamicImage, GrayAlphaImage, GrayImage, Luma, LumaA, Pixel, Rgb, RgbImage, Rgba,
    RgbaImage,
};
use imageproc::stats::histogram;
use ndarray::{s, Array3, ArrayView3};
use tracing::instrument;

/// 3x3 smoothing kernel, normalized by its sum when applied.
const SMOOTH_KERNEL: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

pub(crate) fn image_to_array(image: &DynamicImage) -> Array3<u8> {
    let image = image.to_rgb8();
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, ch)| {
        image.get_pixel(x as u32, y as u32).0[ch]
    })
}

/// Slices `[y0..y1, x0..x1]` out of an `(h, w, c)` array. One-channel arrays
/// are expanded to grey RGB.
pub(crate) fn slice_to_image(
    array: ArrayView3<u8>,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
) -> RgbImage {
    let part = array.slice(s![y0..y1, x0..x1, ..]);
    let channels = part.len_of(ndarray::Axis(2));
    RgbImage::from_fn((x1 - x0) as u32, (y1 - y0) as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels >= 3 {
            Rgb([part[[y, x, 0]], part[[y, x, 1]], part[[y, x, 2]]])
        } else {
            Rgb([part[[y, x, 0]]; 3])
        }
    })
}

/// Converts an enhanced RGB copy of `source` back to the color type of
/// `source`. Grey images have identical channels after enhancement and keep
/// the first; alpha is taken unchanged from `source`.
pub(crate) fn with_color_of(source: &DynamicImage, rgb: RgbImage) -> DynamicImage {
    let (width, height) = rgb.dimensions();
    match source {
        DynamicImage::ImageLuma8(_) => DynamicImage::ImageLuma8(GrayImage::from_fn(
            width,
            height,
            |x, y| Luma([rgb.get_pixel(x, y).0[0]]),
        )),
        DynamicImage::ImageLumaA8(grey) => {
            DynamicImage::ImageLumaA8(GrayAlphaImage::from_fn(width, height, |x, y| {
                LumaA([rgb.get_pixel(x, y).0[0], grey.get_pixel(x, y).0[1]])
            }))
        }
        DynamicImage::ImageRgba8(rgba) => {
            DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                Rgba([r, g, b, rgba.get_pixel(x, y).0[3]])
            }))
        }
        _ => DynamicImage::ImageRgb8(rgb),
    }
}

/// `degenerate + factor * (image - degenerate)`, truncated into `0..=255`.
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for (out, base) in out.pixels_mut().zip(degenerate.pixels()) {
        *out = base.map2(out, |d, p| {
            (d as f32 + factor * (p as f32 - d as f32)).clamp(0.0, 255.0) as u8
        });
    }
    out
}

#[instrument(level = "trace", skip(image))]
pub(crate) fn enhance_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    if factor == 1.0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let mut smoothed: RgbImage = imageops::filter3x3(image, &SMOOTH_KERNEL);
    // border pixels are not filtered
    for (x, y, pixel) in smoothed.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            *pixel = *image.get_pixel(x, y);
        }
    }
    blend(&smoothed, image, factor)
}

#[instrument(level = "trace", skip(image))]
pub(crate) fn enhance_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    if factor == 1.0 {
        return image.clone();
    }
    let mean = luma_mean(image);
    let flat = RgbImage::from_pixel(image.width(), image.height(), Rgb([mean; 3]));
    blend(&flat, image, factor)
}

/// ITU-R 601 luma in fixed point, rounded.
fn to_luma(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

/// Mean grey level, rounded to the nearest integer.
pub(crate) fn luma_mean(image: &RgbImage) -> u8 {
    let hist = histogram(&to_luma(image));
    let (total, weighted) = hist.channels[0]
        .iter()
        .enumerate()
        .fold((0u64, 0u64), |(total, weighted), (level, count)| {
            (total + *count as u64, weighted + level as u64 * *count as u64)
        });
    if total == 0 {
        return 0;
    }
    (weighted as f64 / total as f64 + 0.5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 20) as u8, (y * 30) as u8, ((x + y) * 10) as u8])
        })
    }

    #[test]
    fn unit_factors_are_identity() {
        let image = gradient(6, 5);
        assert_eq!(enhance_sharpness(&image, 1.0), image);
        assert_eq!(enhance_contrast(&image, 1.0), image);
    }

    #[test]
    fn zero_contrast_flattens_to_mean() {
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0; 3])
            } else {
                Rgb([200; 3])
            }
        });
        let flat = enhance_contrast(&image, 0.0);
        assert!(flat.pixels().all(|p| *p == Rgb([100; 3])));
    }

    #[test]
    fn sharpening_keeps_border_and_flat_regions() {
        let image = RgbImage::from_pixel(4, 4, Rgb([80, 90, 100]));
        assert_eq!(enhance_sharpness(&image, 2.0), image);
    }

    #[test]
    fn normalization_maps_to_unit_range() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0; 3])
            } else {
                Rgb([255; 3])
            }
        }));
        let tensor = subtract_mean_normalize(&image, &[0.5; 3], &[2.0; 3]);
        assert_eq!(tensor.dim(), (3, 1, 2));
        assert!((tensor[[0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[2, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn array_round_trip_slices_rows_then_columns() {
        let image = gradient(5, 4);
        let array = image_to_array(&DynamicImage::ImageRgb8(image.clone()));
        assert_eq!(array.dim(), (4, 5, 3));
        let part = slice_to_image(array.view(), 1, 2, 4, 4);
        assert_eq!(part.dimensions(), (3, 2));
        assert_eq!(part.get_pixel(0, 0), image.get_pixel(1, 2));
    }
}
