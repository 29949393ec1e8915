use crate::face_detector::FaceBox;

/// Pixel region within an image, already clamped to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a face box to `[0, image_width) x [0, image_height)`.
///
/// Returns `None` when the clamped region has zero area, including inverted
/// boxes (`x2 < x1`) and boxes entirely outside the image.
pub fn clamp_box(face: &FaceBox, image_width: u32, image_height: u32) -> Option<Region> {
    let max_x = i64::from(image_width);
    let max_y = i64::from(image_height);

    let x1 = i64::from(face.x1).clamp(0, max_x);
    let y1 = i64::from(face.y1).clamp(0, max_y);
    let x2 = i64::from(face.x2).clamp(0, max_x);
    let y2 = i64::from(face.y2).clamp(0, max_y);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    // Bounded by the u32 image dimensions above.
    Some(Region {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}

/// Size of the downscaled grid used for pixelation: `max(1, dimension / block_size)` per axis.
pub fn pixelate_grid(region: &Region, block_size: u32) -> (u32, u32) {
    let block_size = block_size.max(1);
    (
        (region.width / block_size).max(1),
        (region.height / block_size).max(1),
    )
}
