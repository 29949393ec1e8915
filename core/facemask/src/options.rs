use serde::{Deserialize, Serialize};

use crate::engine::{EngineMode, EngineParams};
use crate::error::AnonymizeError;
use crate::transform::MAX_BLUR_STRENGTH;
use crate::{Mode, OutputFormat};

/// Flat per-request configuration.
///
/// Deserializes from camelCase JSON with every field optional, so a request
/// router can hand its payload through unchanged:
///
/// ```
/// let options: facemask::AnonymizeOptions =
///     serde_json::from_str(r#"{ "mode": "blur", "blurStrength": 41 }"#).unwrap();
/// assert_eq!(options.blur_strength, 41);
/// assert_eq!(options.pixelate_size, 15);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnonymizeOptions {
    /// Anonymization applied to each face.
    pub mode: Mode,
    /// Pixel block size for [`Mode::Pixelate`].
    pub pixelate_size: u32,
    /// Gaussian kernel size for [`Mode::Blur`], at most [`MAX_BLUR_STRENGTH`].
    /// Even values are bumped to odd.
    pub blur_strength: u32,
    /// Images whose longer side exceeds this are downscaled for detection only.
    pub max_dimension: u32,
    /// Candidates must score strictly above this to count as faces.
    pub confidence_threshold: f32,
    /// Try the external engine first when one is configured.
    pub use_engine: bool,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Output encoding of the manual path.
    pub format: OutputFormat,
    /// How manual-path parameters translate to the external engine.
    pub engine: EngineSettings,
}

impl Default for AnonymizeOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Pixelate,
            pixelate_size: 15,
            blur_strength: 31,
            max_dimension: 800,
            confidence_threshold: 0.5,
            use_engine: true,
            quality: 95,
            format: OutputFormat::Jpeg,
            engine: EngineSettings::default(),
        }
    }
}

impl AnonymizeOptions {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), AnonymizeError> {
        if self.pixelate_size == 0 {
            return Err(AnonymizeError::InvalidPixelateSize);
        }
        if self.blur_strength > MAX_BLUR_STRENGTH {
            return Err(AnonymizeError::InvalidBlurStrength(self.blur_strength));
        }
        if self.max_dimension == 0 {
            return Err(AnonymizeError::InvalidMaxDimension);
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold < 1.0) {
            return Err(AnonymizeError::InvalidConfidence(self.confidence_threshold));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(AnonymizeError::InvalidQuality(self.quality));
        }
        Ok(())
    }

    /// Strength used by the manual path for the configured mode.
    pub fn strength(&self) -> u32 {
        match self.mode {
            Mode::Pixelate => self.pixelate_size,
            Mode::Blur => self.blur_strength,
        }
    }

    /// Parameters handed to the external engine, rescaled from the manual-path convention.
    pub fn engine_params(&self) -> EngineParams {
        let settings = &self.engine;
        EngineParams {
            mode: EngineMode::from(self.mode),
            threshold: self.confidence_threshold,
            pixelate_size: (self.pixelate_size / settings.pixelate_divisor.max(1)).max(1),
            blur_strength: (self.blur_strength / settings.blur_divisor.max(1)).max(1),
            soft_mask: settings.soft_mask,
            soft_mask_strength: settings.soft_mask_strength,
        }
    }
}

/// Bridge between the manual path's parameter scale and the external engine's.
///
/// The engine's block size and blur strength run on a much smaller scale, so
/// the manual values are divided (and floored at 1) before being passed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Divisor applied to `pixelate_size`.
    pub pixelate_divisor: u32,
    /// Divisor applied to `blur_strength`.
    pub blur_divisor: u32,
    /// Feather the anonymized region into its surroundings.
    pub soft_mask: bool,
    /// Feathering radius in engine units.
    pub soft_mask_strength: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pixelate_divisor: 5,
            blur_divisor: 10,
            soft_mask: true,
            soft_mask_strength: 7,
        }
    }
}

/// Pre-configured option sets.
///
/// Apply with [`crate::Anonymizer::preset`]; like every preset call it
/// replaces the full option set, and individual settings can be overridden
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Library defaults.
    ///
    /// - pixelate, 15px blocks
    /// - blur kernel 31 when switched to blur
    /// - detection at 800px, confidence 0.5
    /// - JPEG at quality 95
    Standard,

    /// Defaults of the photo upload endpoint: 20px blocks, otherwise [`Preset::Standard`].
    Upload,

    /// Coarser anonymization and a lower detection threshold, trading false
    /// positives for fewer missed faces.
    ///
    /// - pixelate, 25px blocks; blur kernel 51
    /// - detection at 1024px, confidence 0.35
    Strong,
}

impl Preset {
    /// Full option set for this preset.
    pub fn options(self) -> AnonymizeOptions {
        let standard = AnonymizeOptions::default();
        match self {
            Preset::Standard => standard,
            Preset::Upload => AnonymizeOptions {
                pixelate_size: 20,
                ..standard
            },
            Preset::Strong => AnonymizeOptions {
                pixelate_size: 25,
                blur_strength: 51,
                max_dimension: 1024,
                confidence_threshold: 0.35,
                ..standard
            },
        }
    }
}
