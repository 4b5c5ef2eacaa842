//! Subject thumbnails for the discovery results.
//!
//! Cosmetic only: upscale with Lanczos, edge-preserving bilateral denoise,
//! then unsharp masking. Nothing here affects tracking.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use lockframe_models::BoundingBox;

use crate::error::MediaResult;

/// Crops smaller than this on either side are returned untouched.
pub const MIN_ENHANCE_SIDE: u32 = 10;

/// Bilateral filter window side.
const BILATERAL_DIAMETER: u32 = 9;
const BILATERAL_SIGMA_COLOR: f32 = 75.0;
const BILATERAL_SIGMA_SPACE: f32 = 75.0;

/// Unsharp mask: `1.5 * image - 0.5 * gaussian(image, 1.0)`.
const UNSHARP_SIGMA: f32 = 1.0;
const UNSHARP_AMOUNT: f32 = 0.5;

/// Copy the pixels under `bbox`, clipped to the frame.
///
/// Coordinates are truncated to whole pixels. A box entirely outside the
/// frame yields an empty image.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let clip = |v: f64, max: u32| -> u32 { v.trunc().clamp(0.0, max as f64) as u32 };

    let x1 = clip(bbox.x1, frame.width());
    let y1 = clip(bbox.y1, frame.height());
    let x2 = clip(bbox.x2, frame.width());
    let y2 = clip(bbox.y2, frame.height());

    if x2 <= x1 || y2 <= y1 {
        return RgbImage::new(0, 0);
    }
    imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image()
}

/// Upscale, denoise and sharpen a subject crop for display.
///
/// The longest side becomes `target_size`, preserving aspect ratio.
pub fn enhance_thumbnail(crop: &RgbImage, target_size: u32) -> RgbImage {
    let (w, h) = crop.dimensions();
    if w < MIN_ENHANCE_SIDE || h < MIN_ENHANCE_SIDE {
        return crop.clone();
    }

    let scale = target_size as f64 / w.max(h) as f64;
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);

    let resized = imageops::resize(crop, new_w, new_h, FilterType::Lanczos3);
    let denoised = bilateral_filter(
        &resized,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );
    unsharp_mask(&denoised, UNSHARP_SIGMA, UNSHARP_AMOUNT)
}

/// Write a thumbnail; the format follows the file extension.
pub fn save_thumbnail(thumbnail: &RgbImage, path: impl AsRef<Path>) -> MediaResult<()> {
    thumbnail.save(path.as_ref())?;
    Ok(())
}

/// Edge-preserving smoothing, applied per channel.
fn bilateral_filter(img: &RgbImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (w, h) = img.dimensions();

    let planes: Vec<GrayImage> = (0..3)
        .map(|c| {
            let plane = GrayImage::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y)[c]]));
            imageproc::filter::bilateral_filter(&plane, diameter, sigma_color, sigma_space)
        })
        .collect();

    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            planes[0].get_pixel(x, y)[0],
            planes[1].get_pixel(x, y)[0],
            planes[2].get_pixel(x, y)[0],
        ])
    })
}

/// `(1 + amount) * img - amount * blur(img)`, saturated to `u8`.
fn unsharp_mask(img: &RgbImage, sigma: f32, amount: f32) -> RgbImage {
    let blurred = imageops::blur(img, sigma);
    let mut out = img.clone();

    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let sharp = (1.0 + amount) * dst[c] as f32 - amount * soft[c] as f32;
            dst[c] = sharp.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([220, 40, 40])
            } else {
                Rgb([30, 30, 200])
            }
        })
    }

    #[test]
    fn test_small_crop_is_returned_unchanged() {
        let crop = checker(9, 40);
        let out = enhance_thumbnail(&crop, 256);
        assert_eq!(out, crop);
    }

    #[test]
    fn test_enhance_scales_longest_side() {
        let crop = checker(64, 128);
        let out = enhance_thumbnail(&crop, 256);
        assert_eq!(out.dimensions(), (128, 256));

        let wide = checker(128, 32);
        assert_eq!(enhance_thumbnail(&wide, 64).dimensions(), (64, 16));
    }

    #[test]
    fn test_enhance_keeps_flat_color() {
        let crop = RgbImage::from_pixel(20, 20, Rgb([90, 120, 150]));
        let out = enhance_thumbnail(&crop, 32);
        for p in out.pixels() {
            for c in 0..3 {
                assert!((p[c] as i32 - [90, 120, 150][c]).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_bilateral_preserves_hard_edges() {
        let img = RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let out = bilateral_filter(&img, 9, 75.0, 75.0);
        // A 255 step carries almost no weight at sigma 75
        assert!(out.get_pixel(9, 5)[0] <= 8);
        assert!(out.get_pixel(10, 5)[0] >= 247);
        assert!(out.get_pixel(0, 5)[1] <= 1);
        assert!(out.get_pixel(19, 5)[2] >= 254);
    }

    #[test]
    fn test_save_thumbnail_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subject_1.png");
        let thumb = checker(32, 64);

        save_thumbnail(&thumb, &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded, thumb);
    }

    #[test]
    fn test_save_thumbnail_reports_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_thumbnail(&checker(8, 8), dir.path().join("subject.unknownext"));
        assert!(matches!(result, Err(crate::error::MediaError::Image(_))));
    }

    #[test]
    fn test_crop_region_clips_to_frame() {
        let frame = RgbImage::new(100, 50);
        let crop = crop_region(&frame, &BoundingBox::new(-10.0, 10.5, 30.9, 80.0));
        assert_eq!(crop.dimensions(), (30, 40));

        let outside = crop_region(&frame, &BoundingBox::new(200.0, 0.0, 300.0, 10.0));
        assert_eq!(outside.dimensions(), (0, 0));
    }
}
