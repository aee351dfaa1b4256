//! Background-subtraction motion detection.
//!
//! Every frame is normalized the same way before comparison: scaled to a
//! fixed width, converted to grayscale and blurred. The area threshold is
//! expressed in that scaled coordinate space, so it does not depend on the
//! native camera resolution.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::contour_area;
use imageproc::morphology::dilate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub resize_width: u32,
    /// Side of the square Gaussian kernel; must be odd.
    pub blur_kernel: u32,
    pub diff_threshold: u8,
    /// 3x3 dilation passes applied to the thresholded delta.
    pub dilate_iterations: u8,
    /// Minimum contour area (px², scaled coordinates) that counts as motion.
    pub min_area: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            resize_width: 500,
            blur_kernel: 21,
            diff_threshold: 25,
            dilate_iterations: 2,
            min_area: 1000.0,
        }
    }
}

impl DetectionParams {
    /// Sigma a Gaussian of this kernel size gets when none is given
    /// explicitly: `0.3 * ((k - 1) / 2 - 1) + 0.8`.
    fn blur_sigma(&self) -> f32 {
        0.3 * ((self.blur_kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }
}

#[derive(Debug, Clone, Default)]
pub struct MotionDetector {
    params: DetectionParams,
}

impl MotionDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Scale to the detection width, drop color and smooth out sensor noise.
    pub fn to_gray_blur(&self, frame: &RgbImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        let gray = if width == self.params.resize_width || width == 0 {
            imageops::grayscale(frame)
        } else {
            let target_height = ((height as u64 * self.params.resize_width as u64
                + width as u64 / 2)
                / width as u64)
                .max(1) as u32;
            let resized = imageops::resize(
                frame,
                self.params.resize_width,
                target_height,
                FilterType::Triangle,
            );
            imageops::grayscale(&resized)
        };
        imageproc::filter::gaussian_blur_f32(&gray, self.params.blur_sigma())
    }

    /// Outer contours of the regions where `current` differs from `reference`.
    pub fn contour_differences(
        &self,
        reference: &GrayImage,
        current: &GrayImage,
    ) -> Vec<Contour<u32>> {
        let delta = abs_diff(reference, current);
        let thresh = threshold(&delta, self.params.diff_threshold, ThresholdType::Binary);
        let dilated = dilate(&thresh, Norm::LInf, self.params.dilate_iterations);

        find_contours::<u32>(&dilated)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .collect()
    }

    pub fn motion_in(&self, contours: &[Contour<u32>]) -> bool {
        contours
            .iter()
            .any(|c| contour_area(&c.points) > self.params.min_area)
    }

    /// Full pipeline for one already-normalized frame.
    pub fn detect(&self, reference: &GrayImage, current: &GrayImage) -> bool {
        let contours = self.contour_differences(reference, current);
        log::debug!("{} contour(s) against reference", contours.len());
        self.motion_in(&contours)
    }
}

/// Per-pixel absolute difference. Frames of different size (a renegotiated
/// camera) are compared over their common area only.
fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    GrayImage::from_fn(width, height, |x, y| {
        let pa = a.get_pixel(x, y)[0];
        let pb = b.get_pixel(x, y)[0];
        image::Luma([pa.abs_diff(pb)])
    })
}
