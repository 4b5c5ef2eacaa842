//! Crop window computation for the vertical output.
//!
//! The window keeps the full frame height and slides horizontally; its width
//! comes from the target aspect ratio at that height.

use image::{imageops, RgbImage};
use lockframe_models::{AspectRatio, CropWindow};

/// Turns a tracked center into a clamped, fixed-size crop window.
#[derive(Debug, Clone, Copy)]
pub struct CropPlanner {
    frame_width: u32,
    frame_height: u32,
    target_width: u32,
}

impl CropPlanner {
    /// Create a planner for frames of `frame_width`x`frame_height`.
    ///
    /// The window is `floor(frame_height * ratio)` wide, capped at the frame
    /// width for sources already narrower than the target ratio.
    pub fn new(frame_width: u32, frame_height: u32, aspect_ratio: AspectRatio) -> Self {
        let target_width = aspect_ratio
            .width_for_height(frame_height)
            .min(frame_width)
            .max(1);
        Self {
            frame_width,
            frame_height,
            target_width,
        }
    }

    /// Output frame width.
    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    /// Output frame height (the full source height).
    pub fn target_height(&self) -> u32 {
        self.frame_height
    }

    /// Window centered on `center`, pushed back inside the frame at the edges.
    pub fn plan(&self, center: f64) -> CropWindow {
        let max_x = self.frame_width.saturating_sub(self.target_width) as f64;
        let x = (center - self.target_width as f64 / 2.0).round();
        // NaN saturates to 0 in the cast
        let x_start = x.clamp(0.0, max_x) as u32;
        CropWindow::new(x_start, self.target_width, self.frame_height)
    }
}

/// Copy the window's pixels out of `frame`.
pub fn apply_crop(frame: &RgbImage, window: &CropWindow) -> RgbImage {
    imageops::crop_imm(frame, window.x_start, 0, window.width, window.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_1080p_portrait_window() {
        let planner = CropPlanner::new(1920, 1080, AspectRatio::PORTRAIT);
        assert_eq!(planner.target_width(), 607);
        assert_eq!(planner.target_height(), 1080);

        // 960 - 303.5 = 656.5 rounds away from zero
        assert_eq!(planner.plan(960.0), CropWindow::new(657, 607, 1080));
    }

    #[test]
    fn test_window_stays_inside_frame() {
        let planner = CropPlanner::new(1920, 1080, AspectRatio::PORTRAIT);
        let max_x = 1920 - 607;

        for center in 0..=1920 {
            let window = planner.plan(center as f64);
            assert!(window.x_start <= max_x);
            assert!(window.x_end() <= 1920);
        }
        assert_eq!(planner.plan(0.0).x_start, 0);
        assert_eq!(planner.plan(1920.0).x_start, max_x);
        assert_eq!(planner.plan(-500.0).x_start, 0);
        assert_eq!(planner.plan(1e9).x_start, max_x);
        assert_eq!(planner.plan(f64::NAN).x_start, 0);
    }

    #[test]
    fn test_narrow_source_uses_full_width() {
        let planner = CropPlanner::new(400, 1080, AspectRatio::PORTRAIT);
        assert_eq!(planner.target_width(), 400);
        assert_eq!(planner.plan(200.0).x_start, 0);
    }

    #[test]
    fn test_apply_crop_copies_window() {
        let frame = RgbImage::from_fn(64, 16, |x, _| Rgb([x as u8, 0, 0]));
        let planner = CropPlanner::new(64, 16, AspectRatio::PORTRAIT);
        let window = planner.plan(40.0);

        let cropped = apply_crop(&frame, &window);
        assert_eq!(cropped.dimensions(), (9, 16));
        assert_eq!(cropped.get_pixel(0, 0)[0] as u32, window.x_start);
    }
}
