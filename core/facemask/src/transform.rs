use image::imageops::{self, FilterType};
use image::{GenericImage, ImageResult, RgbImage};
use tracing::{debug, warn};

use crate::face_detector::FaceBox;
use crate::region::{clamp_box, pixelate_grid, Region};
use crate::Mode;

/// Largest accepted blur kernel size. Larger requests are rejected by option
/// validation and clamped here.
pub const MAX_BLUR_STRENGTH: u32 = 255;

/// Anonymize every face box in a copy of `image`.
///
/// `strength` is the pixel block size for [`Mode::Pixelate`] and the Gaussian
/// kernel size for [`Mode::Blur`], clamped to [`MAX_BLUR_STRENGTH`]. Boxes are
/// clamped to the image and zero-area boxes are skipped. Each box is applied
/// to the current state of the output, so overlapping boxes compound. A
/// failure on one box is logged and the remaining boxes are still processed.
pub fn transform(image: &RgbImage, boxes: &[FaceBox], mode: Mode, strength: u32) -> RgbImage {
    let mut output = image.clone();
    let (width, height) = output.dimensions();
    let kernel = match mode {
        Mode::Blur => Some(gaussian_kernel(effective_kernel_size(
            strength.min(MAX_BLUR_STRENGTH),
        ))),
        Mode::Pixelate => None,
    };

    let mut applied = 0usize;
    for face in boxes {
        let Some(region) = clamp_box(face, width, height) else {
            debug!(?face, "skipping face box with no area inside the image");
            continue;
        };

        let result = match &kernel {
            Some(kernel) => blur_region(&mut output, region, kernel),
            None => pixelate_region(&mut output, region, strength),
        };

        match result {
            Ok(()) => applied += 1,
            Err(e) => warn!(?face, error = %e, "failed to anonymize face region, continuing"),
        }
    }

    debug!(?mode, boxes = boxes.len(), applied, "region transform complete");
    output
}

/// Pixelate face regions with the given block size.
pub fn pixelate_faces(image: &RgbImage, boxes: &[FaceBox], pixelate_size: u32) -> RgbImage {
    transform(image, boxes, Mode::Pixelate, pixelate_size)
}

/// Gaussian-blur face regions. Even kernel sizes are bumped to the next odd value.
pub fn blur_faces(image: &RgbImage, boxes: &[FaceBox], blur_strength: u32) -> RgbImage {
    transform(image, boxes, Mode::Blur, blur_strength)
}

/// Gaussian kernels need an odd size: even values are bumped by one.
pub fn effective_kernel_size(strength: u32) -> u32 {
    if strength % 2 == 0 {
        strength + 1
    } else {
        strength
    }
}

/// Default sigma for a kernel of `size` taps: `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub(crate) fn sigma_for_kernel(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1-D Gaussian kernel of odd length `size`.
pub(crate) fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1);
    let sigma = sigma_for_kernel(size);
    let center = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Linear downscale then nearest-neighbour upscale.
///
/// The linear pass averages each block before it is blown up into hard-edged
/// tiles by the nearest pass.
fn pixelate_region(output: &mut RgbImage, region: Region, block_size: u32) -> ImageResult<()> {
    let roi = imageops::crop_imm(&*output, region.x, region.y, region.width, region.height)
        .to_image();
    let (grid_w, grid_h) = pixelate_grid(&region, block_size);

    let small = imageops::resize(&roi, grid_w, grid_h, FilterType::Triangle);
    let tiles = imageops::resize(&small, region.width, region.height, FilterType::Nearest);

    output.copy_from(&tiles, region.x, region.y)
}

fn blur_region(output: &mut RgbImage, region: Region, kernel: &[f32]) -> ImageResult<()> {
    let roi = imageops::crop_imm(&*output, region.x, region.y, region.width, region.height)
        .to_image();
    let blurred = imageproc::filter::separable_filter_equal(&roi, kernel);
    output.copy_from(&blurred, region.x, region.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Non-uniform test image: gradient with a fine checker overlay.
    fn make_test_rgb(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let checker = if (x / 2 + y / 2) % 2 == 0 { 0 } else { 60 };
            *pixel = image::Rgb([
                ((x * 190 / width.max(1)) + checker) as u8,
                ((y * 190 / height.max(1)) + checker) as u8,
                (128 + checker / 2) as u8,
            ]);
        }
        img
    }

    fn face(x1: i32, y1: i32, x2: i32, y2: i32) -> FaceBox {
        FaceBox { x1, y1, x2, y2 }
    }

    fn region_differs(a: &RgbImage, b: &RgbImage, r: Region) -> bool {
        (r.y..r.y + r.height)
            .any(|y| (r.x..r.x + r.width).any(|x| a.get_pixel(x, y) != b.get_pixel(x, y)))
    }

    fn outside_identical(a: &RgbImage, b: &RgbImage, regions: &[Region]) -> bool {
        a.enumerate_pixels().all(|(x, y, p)| {
            let inside = regions
                .iter()
                .any(|r| x >= r.x && x < r.x + r.width && y >= r.y && y < r.y + r.height);
            inside || p == b.get_pixel(x, y)
        })
    }

    #[test]
    fn kernel_size_is_forced_odd() {
        for k in (0..100).step_by(2) {
            assert_eq!(effective_kernel_size(k), k + 1);
        }
        assert_eq!(effective_kernel_size(31), 31);
        assert_eq!(effective_kernel_size(1), 1);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(31);
        assert_eq!(kernel.len(), 31);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!((kernel[0] - kernel[30]).abs() < 1e-7);
        assert!(kernel[15] > kernel[14]);
    }

    #[test]
    fn sigma_matches_auto_derivation() {
        // k = 31 -> 0.3 * (15 - 1) + 0.8 = 5.0
        assert!((sigma_for_kernel(31) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn pixelate_changes_only_the_face_region() {
        let img = make_test_rgb(800, 600);
        let out = pixelate_faces(&img, &[face(100, 100, 300, 300)], 15);
        let region = Region {
            x: 100,
            y: 100,
            width: 200,
            height: 200,
        };

        assert_eq!(out.dimensions(), (800, 600));
        assert!(region_differs(&img, &out, region));
        assert!(outside_identical(&img, &out, &[region]));
    }

    #[test]
    fn pixelated_region_is_blocky() {
        let img = make_test_rgb(800, 600);
        let out = pixelate_faces(&img, &[face(100, 100, 300, 300)], 15);

        // 200 / 15 = 13 cells per axis, so at most 13 x 13 distinct colours.
        let colours: HashSet<[u8; 3]> = (100..300)
            .flat_map(|y| (100..300).map(move |x| (x, y)))
            .map(|(x, y)| out.get_pixel(x, y).0)
            .collect();
        assert!(colours.len() <= 13 * 13, "{} colours", colours.len());
        assert!(colours.len() > 1);
    }

    #[test]
    fn pixelate_cells_are_uniform() {
        let img = make_test_rgb(120, 120);
        let out = pixelate_faces(&img, &[face(0, 0, 120, 120)], 20);

        // 120 / 20 = 6 cells of exactly 20 px: every cell holds a single colour.
        for cell_y in 0..6 {
            for cell_x in 0..6 {
                let origin = out.get_pixel(cell_x * 20, cell_y * 20);
                for dy in 0..20 {
                    for dx in 0..20 {
                        assert_eq!(out.get_pixel(cell_x * 20 + dx, cell_y * 20 + dy), origin);
                    }
                }
            }
        }
    }

    #[test]
    fn pixelating_twice_keeps_the_block_pattern() {
        let img = make_test_rgb(120, 120);
        let once = pixelate_faces(&img, &[face(0, 0, 120, 120)], 20);
        let twice = pixelate_faces(&once, &[face(0, 0, 120, 120)], 20);

        let max_diff = once
            .pixels()
            .zip(twice.pixels())
            .flat_map(|(a, b)| a.0.iter().zip(b.0.iter()).map(|(x, y)| x.abs_diff(*y)))
            .max()
            .unwrap();
        assert!(max_diff <= 64, "max channel diff {max_diff}");
    }

    #[test]
    fn tiny_region_pixelates_to_a_single_block() {
        let img = make_test_rgb(50, 50);
        let out = pixelate_faces(&img, &[face(10, 10, 20, 18)], 15);
        let first = out.get_pixel(10, 10);
        for y in 10..18 {
            for x in 10..20 {
                assert_eq!(out.get_pixel(x, y), first);
            }
        }
    }

    #[test]
    fn blur_changes_only_the_face_region() {
        let img = make_test_rgb(200, 200);
        let region = Region {
            x: 40,
            y: 60,
            width: 80,
            height: 70,
        };
        let out = blur_faces(&img, &[face(40, 60, 120, 130)], 31);

        assert!(region_differs(&img, &out, region));
        assert!(outside_identical(&img, &out, &[region]));
    }

    #[test]
    fn even_blur_strength_matches_next_odd() {
        let img = make_test_rgb(100, 100);
        let boxes = [face(10, 10, 90, 90)];
        assert_eq!(blur_faces(&img, &boxes, 30), blur_faces(&img, &boxes, 31));
    }

    #[test]
    fn oversized_blur_strength_is_clamped() {
        let img = make_test_rgb(32, 32);
        let boxes = [face(4, 4, 28, 28)];
        let clamped = blur_faces(&img, &boxes, MAX_BLUR_STRENGTH);

        assert_eq!(blur_faces(&img, &boxes, u32::MAX - 1), clamped);
        assert_eq!(blur_faces(&img, &boxes, u32::MAX), clamped);
    }

    #[test]
    fn blur_flattens_the_checker_pattern() {
        let img = make_test_rgb(100, 100);
        let out = blur_faces(&img, &[face(0, 0, 100, 100)], 15);

        let contrast = |im: &RgbImage| {
            (20..80)
                .map(|x| i32::from(im.get_pixel(x, 50)[2]) - i32::from(im.get_pixel(x + 1, 50)[2]))
                .map(i32::abs)
                .sum::<i32>()
        };
        assert!(contrast(&out) < contrast(&img));
    }

    #[test]
    fn out_of_bounds_box_is_clamped() {
        let img = make_test_rgb(100, 80);
        let out = transform(&img, &[face(60, 40, 500, 400)], Mode::Pixelate, 10);
        let region = Region {
            x: 60,
            y: 40,
            width: 40,
            height: 40,
        };

        assert_eq!(out.dimensions(), (100, 80));
        assert!(region_differs(&img, &out, region));
        assert!(outside_identical(&img, &out, &[region]));
    }

    #[test]
    fn degenerate_and_outside_boxes_are_skipped() {
        let img = make_test_rgb(64, 64);
        let boxes = [
            face(10, 10, 10, 40),
            face(30, 30, 20, 20),
            face(100, 100, 120, 120),
            face(-20, -20, -5, -5),
        ];
        for mode in [Mode::Pixelate, Mode::Blur] {
            assert_eq!(transform(&img, &boxes, mode, 15), img);
        }
    }

    #[test]
    fn overlapping_boxes_are_applied_in_turn() {
        let img = make_test_rgb(120, 120);
        let first = pixelate_faces(&img, &[face(0, 0, 80, 80)], 10);
        let both = pixelate_faces(&img, &[face(0, 0, 80, 80), face(40, 40, 120, 120)], 10);
        let second_over_first = pixelate_faces(&first, &[face(40, 40, 120, 120)], 10);

        assert_eq!(both, second_over_first);
    }

    #[test]
    fn input_image_is_not_mutated() {
        let img = make_test_rgb(64, 64);
        let copy = img.clone();
        let _ = transform(&img, &[face(0, 0, 64, 64)], Mode::Blur, 9);
        assert_eq!(img, copy);
    }
}
