//! Face anonymization for uploaded photos: detect faces, pixelate or blur them, re-encode.
//!
//! An optional external engine is tried first; if it is missing or fails, the
//! built-in path decodes the image, runs the face detector, anonymizes every
//! detected region and encodes the result.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use facemask::{Anonymizer, Detector, Mode, SsdFaceDetector};
//!
//! let backend = SsdFaceDetector::new("res10_300x300_ssd.onnx");
//! let detector = Arc::new(Detector::new(Box::new(backend)));
//! let raw_bytes = std::fs::read("photo.jpg").unwrap();
//! let result = Anonymizer::new(detector)
//!     .mode(Mode::Blur)
//!     .blur_strength(41)
//!     .process(&raw_bytes)
//!     .unwrap();
//! println!("{} faces, {} bytes", result.face_count, result.data.len());
//! ```
#![warn(missing_docs)]

/// Image decoding and encoding.
pub mod codec;
/// External anonymization engine adapter.
pub mod engine;
mod error;
/// Face detection traits and data types.
pub mod face_detector;
mod options;
mod pipeline;
mod region;
#[cfg(feature = "onnx")]
/// SSD face detector backed by ONNX Runtime.
pub mod ssd_backend;
/// Stored-image jobs: fetch, anonymize, store under a per-user key.
pub mod store;
/// Pixelate and blur operations over face regions.
pub mod transform;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use engine::{CommandEngine, ExternalEngine};
/// Error types returned by facemask operations.
pub use error::{AnonymizeError, EngineError, ModelError, StoreError};
/// Face detection trait, detector service and face box type.
pub use face_detector::{Candidate, Detector, FaceBox, FaceDetector};
pub use options::{AnonymizeOptions, EngineSettings, Preset};
#[cfg(feature = "onnx")]
/// ONNX SSD face detector.
pub use ssd_backend::SsdFaceDetector;
pub use store::{anonymize_stored, ByteStore, DirectoryStore, StoredImageRequest, StoredImageResult};

/// How each detected face is anonymized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Mosaic of solid blocks, `pixelate_size` pixels on a side.
    #[default]
    Pixelate,

    /// Gaussian blur with a `blur_strength` kernel.
    Blur,
}

/// Output encoding of anonymized images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Baseline JPEG at the configured quality.
    #[default]
    Jpeg,

    /// Lossless PNG.
    Png,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    /// MIME type for upload metadata.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Which path produced a [`ProcessingResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingPath {
    /// The external engine anonymized the image, or reported nothing to anonymize.
    ExternalEngine,

    /// The built-in detect, transform, encode path.
    Manual,
}

/// Result of a single anonymization.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Anonymized image bytes, or the untouched input when no face was found.
    pub data: Vec<u8>,

    /// Number of faces detected.
    ///
    /// On the external-engine path this comes from a separate detector pass
    /// over the original image, so it can differ from the number of regions
    /// the engine actually changed.
    pub face_count: usize,

    /// Path that produced `data`.
    pub path: ProcessingPath,
}

/// Builder-style face anonymizer.
///
/// Holds the shared detector, an optional external engine and the default
/// options. The anonymizer itself is immutable while processing, so one
/// instance can serve concurrent requests from behind an `Arc`.
#[derive(Clone)]
pub struct Anonymizer {
    detector: Arc<Detector>,
    engine: Option<Arc<dyn ExternalEngine>>,
    options: AnonymizeOptions,
}

impl Anonymizer {
    /// Create an anonymizer around a shared detector, with default options and no engine.
    pub fn new(detector: Arc<Detector>) -> Self {
        Self {
            detector,
            engine: None,
            options: AnonymizeOptions::default(),
        }
    }

    /// Configure from the environment.
    ///
    /// The SSD model comes from `FACEMASK_MODEL_PATH` and the engine program
    /// from `FACEMASK_ENGINE_BIN`. A missing model leaves detection disabled,
    /// so every image passes through unanonymized.
    pub fn from_env() -> Self {
        let detector = Self::detector_from_env();
        let anonymizer = Self::new(Arc::new(detector));
        match CommandEngine::from_env() {
            Some(engine) => {
                info!("external anonymization engine configured");
                anonymizer.engine(Arc::new(engine))
            }
            None => anonymizer,
        }
    }

    #[cfg(feature = "onnx")]
    fn detector_from_env() -> Detector {
        match SsdFaceDetector::from_env() {
            Ok(backend) => Detector::new(Box::new(backend)),
            Err(e) => {
                warn!(error = %e, "face detection disabled");
                Detector::disabled()
            }
        }
    }

    #[cfg(not(feature = "onnx"))]
    fn detector_from_env() -> Detector {
        warn!("built without the onnx feature, face detection disabled");
        Detector::disabled()
    }

    /// Try `engine` before the manual path.
    pub fn engine(mut self, engine: Arc<dyn ExternalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replace every option with a preset. Individual settings can be overridden after this call.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use facemask::{Anonymizer, Detector, Mode, Preset};
    ///
    /// let anonymizer = Anonymizer::new(Arc::new(Detector::disabled()))
    ///     .preset(Preset::Strong)
    ///     .mode(Mode::Blur);
    /// ```
    pub fn preset(mut self, preset: Preset) -> Self {
        self.options = preset.options();
        self
    }

    /// Replace every option.
    pub fn options(mut self, options: AnonymizeOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the anonymization mode (default: `Mode::Pixelate`).
    pub fn mode(mut self, mode: Mode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Set the pixelation block size in pixels (default: 15).
    pub fn pixelate_size(mut self, size: u32) -> Self {
        self.options.pixelate_size = size;
        self
    }

    /// Set the blur kernel size (default: 31). Even values are bumped to odd;
    /// values above [`transform::MAX_BLUR_STRENGTH`] fail validation.
    pub fn blur_strength(mut self, strength: u32) -> Self {
        self.options.blur_strength = strength;
        self
    }

    /// Set the longest side used for detection (default: 800).
    pub fn max_dimension(mut self, dimension: u32) -> Self {
        self.options.max_dimension = dimension;
        self
    }

    /// Set the detection confidence threshold (default: 0.5).
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.options.confidence_threshold = threshold;
        self
    }

    /// Enable or disable the external engine (default: enabled when one is configured).
    pub fn use_engine(mut self, enable: bool) -> Self {
        self.options.use_engine = enable;
        self
    }

    /// Set the JPEG quality, 1-100 (default: 95).
    pub fn quality(mut self, quality: u8) -> Self {
        self.options.quality = quality;
        self
    }

    /// Set the manual-path output format (default: `OutputFormat::Jpeg`).
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.options.format = format;
        self
    }

    /// Current default options.
    pub fn settings(&self) -> &AnonymizeOptions {
        &self.options
    }

    /// Shared detector.
    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    /// Anonymize `input` with the configured options.
    pub fn process(&self, input: &[u8]) -> Result<ProcessingResult, AnonymizeError> {
        self.process_with(input, &self.options)
    }

    /// Anonymize `input` with per-request options instead of the configured ones.
    pub fn process_with(
        &self,
        input: &[u8],
        options: &AnonymizeOptions,
    ) -> Result<ProcessingResult, AnonymizeError> {
        options.validate()?;
        pipeline::process(&self.detector, self.engine.as_deref(), options, input)
    }
}
