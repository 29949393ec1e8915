use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ModelError;

/// Face bounding box in the pixel space of the original, undownscaled image.
///
/// Raw detector output is not clamped: boxes may extend past the image or be
/// degenerate. Consumers clamp with [`crate::region::clamp_box`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    /// Left edge (inclusive).
    pub x1: i32,
    /// Top edge (inclusive).
    pub y1: i32,
    /// Right edge (exclusive).
    pub x2: i32,
    /// Bottom edge (exclusive).
    pub y2: i32,
}

impl FaceBox {
    /// Horizontal extent; negative for inverted boxes.
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    /// Vertical extent; negative for inverted boxes.
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Raw detector candidate before thresholding.
///
/// Coordinates are normalized to `[0, 1]` against the image the backend was
/// given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
}

/// Pluggable face detection backend.
///
/// Implement this trait to run a different network, or to drive the pipeline
/// with fixed detections in tests, and hand it to [`Detector::new`].
pub trait FaceDetector: Send + Sync {
    /// Run one forward pass over `image` and return every candidate in model order.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Candidate>, ModelError>;
}

/// Detector service shared across requests.
///
/// Construct once at process start and share it behind an `Arc`. The backend
/// is read-only after construction.
pub struct Detector {
    backend: Option<Box<dyn FaceDetector>>,
}

impl Detector {
    /// Wrap a detection backend.
    pub fn new(backend: Box<dyn FaceDetector>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A detector without a model. Every call reports zero faces.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// Whether a backend is configured. A configured backend may still fail to load lazily.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Detect faces and return their boxes in original-image coordinates.
    ///
    /// Images larger than `max_dimension` are downscaled for detection only;
    /// the resulting boxes are mapped back by dividing by the scale factor.
    /// Candidates are kept when `confidence > confidence_threshold`, in the
    /// order the backend produced them.
    ///
    /// A missing or failing model yields an empty list rather than an error,
    /// which makes the pipeline pass the image through unanonymized.
    pub fn detect(
        &self,
        image: &RgbImage,
        max_dimension: u32,
        confidence_threshold: f32,
    ) -> Vec<FaceBox> {
        let Some(backend) = self.backend.as_deref() else {
            warn!("no face detection model configured, reporting zero faces");
            return Vec::new();
        };

        let (width, height) = image.dimensions();
        let longest = width.max(height);
        if longest == 0 {
            return Vec::new();
        }

        let scale = (f64::from(max_dimension) / f64::from(longest)).min(1.0);
        let detection_image = if scale < 1.0 {
            let small_w = ((f64::from(width) * scale) as u32).max(1);
            let small_h = ((f64::from(height) * scale) as u32).max(1);
            image::imageops::resize(image, small_w, small_h, FilterType::Triangle)
        } else {
            image.clone()
        };

        let candidates = match backend.detect(&detection_image) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "face detection model unavailable, reporting zero faces");
                return Vec::new();
            }
        };

        let (small_w, small_h) = detection_image.dimensions();
        let faces: Vec<FaceBox> = candidates
            .iter()
            .filter(|c| c.confidence > confidence_threshold)
            .map(|c| to_original_space(c, small_w, small_h, scale))
            .collect();

        debug!(
            width,
            height,
            scale,
            candidates = candidates.len(),
            faces = faces.len(),
            "face detection complete"
        );

        faces
    }
}

/// Denormalize against the detection image, then undo the downscale.
/// Both steps truncate toward zero.
fn to_original_space(candidate: &Candidate, width: u32, height: u32, scale: f64) -> FaceBox {
    let (w, h) = (f64::from(width), f64::from(height));
    let denorm = |v: f32, extent: f64| (f64::from(v) * extent) as i32;

    let mut face = FaceBox {
        x1: denorm(candidate.x1, w),
        y1: denorm(candidate.y1, h),
        x2: denorm(candidate.x2, w),
        y2: denorm(candidate.y2, h),
    };

    if scale < 1.0 {
        let rescale = |v: i32| (f64::from(v) / scale) as i32;
        face = FaceBox {
            x1: rescale(face.x1),
            y1: rescale(face.y1),
            x2: rescale(face.x2),
            y2: rescale(face.y2),
        };
    }

    face
}
