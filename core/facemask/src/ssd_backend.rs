use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use crate::error::ModelError;
use crate::face_detector::{Candidate, FaceDetector};

/// Environment variable naming the SSD model file.
pub const MODEL_PATH_ENV: &str = "FACEMASK_MODEL_PATH";

/// Network input resolution.
pub const INPUT_SIZE: u32 = 300;

/// Per-channel means subtracted during training, in B, G, R plane order.
pub const CHANNEL_MEANS_BGR: [f32; 3] = [104.0, 177.0, 123.0];

/// Values per detection row: `[image_id, label, confidence, x1, y1, x2, y2]`.
const DETECTION_WIDTH: usize = 7;

/// Single-shot face detector (res10 300x300 SSD exported to ONNX), run with ONNX Runtime.
///
/// The session is created on first use and reused for every later call.
/// `Session::run` needs `&mut`, so calls are serialized through a mutex; the
/// weights themselves are never modified after load.
pub struct SsdFaceDetector {
    model_path: PathBuf,
    session: OnceCell<Mutex<Session>>,
}

impl SsdFaceDetector {
    /// Create a detector for the ONNX model at `model_path`. The file is not read until first use.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            session: OnceCell::new(),
        }
    }

    /// Create a detector from the path in `FACEMASK_MODEL_PATH`.
    pub fn from_env() -> Result<Self, ModelError> {
        let path = std::env::var_os(MODEL_PATH_ENV)
            .ok_or_else(|| ModelError::Load(format!("{MODEL_PATH_ENV} is not set")))?;
        Ok(Self::new(PathBuf::from(path)))
    }

    /// Path of the model file.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Load the model now instead of on the first detection.
    pub fn preload(&self) -> Result<(), ModelError> {
        self.session().map(|_| ())
    }

    fn session(&self) -> Result<&Mutex<Session>, ModelError> {
        self.session.get_or_try_init(|| {
            info!("loading SSD face model from {}", self.model_path.display());

            let session = Session::builder()
                .map_err(|e| ModelError::Load(e.to_string()))?
                .commit_from_file(&self.model_path)
                .map_err(|e| ModelError::Load(e.to_string()))?;

            info!("SSD face model loaded");
            Ok(Mutex::new(session))
        })
    }
}

impl FaceDetector for SsdFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Candidate>, ModelError> {
        let input = preprocess(image);

        let mut session = self
            .session()?
            .lock()
            .map_err(|e| ModelError::Inference(format!("session lock poisoned: {e}")))?;

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_, detections) = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::Output("model produced no outputs".into()))?;
        let (shape, data) = detections
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let candidates = parse_detections(&dims, data)?;
        debug!(candidates = candidates.len(), "SSD forward pass complete");
        Ok(candidates)
    }
}

/// Resize to the network input and build a `[1, 3, 300, 300]` BGR tensor,
/// training means subtracted.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let side = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = f32::from(b) - CHANNEL_MEANS_BGR[0];
        input[[0, 1, y, x]] = f32::from(g) - CHANNEL_MEANS_BGR[1];
        input[[0, 2, y, x]] = f32::from(r) - CHANNEL_MEANS_BGR[2];
    }

    input
}

/// Parse a `(batch, 1, N, 7)` detection tensor into candidates, in row order.
fn parse_detections(shape: &[i64], data: &[f32]) -> Result<Vec<Candidate>, ModelError> {
    if shape.len() != 4 || shape[3] as usize != DETECTION_WIDTH {
        return Err(ModelError::Output(format!(
            "expected detections of shape [batch, 1, N, 7], got {shape:?}"
        )));
    }

    let rows = shape[2].max(0) as usize;
    if data.len() < rows * DETECTION_WIDTH {
        return Err(ModelError::Output(format!(
            "detection tensor holds {} values, expected at least {}",
            data.len(),
            rows * DETECTION_WIDTH
        )));
    }

    Ok(data
        .chunks_exact(DETECTION_WIDTH)
        .take(rows)
        .map(|row| Candidate {
            confidence: row[2],
            x1: row[3],
            y1: row[4],
            x2: row[5],
            y2: row[6],
        })
        .collect())
}
