use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, ImageFormat, RgbImage};

use crate::error::AnonymizeError;
use crate::OutputFormat;

/// Decode input bytes into an RGB buffer.
///
/// An alpha channel is dropped: colour values are kept as stored, so fully
/// transparent pixels show their underlying RGB.
pub fn decode(input: &[u8]) -> Result<RgbImage, AnonymizeError> {
    let decoded =
        image::load_from_memory(input).map_err(|e| AnonymizeError::DecodeError(e.to_string()))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(AnonymizeError::ZeroDimensions);
    }

    Ok(decoded.to_rgb8())
}

/// Encode an RGB buffer. `quality` (1-100) applies to JPEG only.
pub fn encode(
    image: &RgbImage,
    format: &OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, AnonymizeError> {
    let mut buffer = Vec::new();

    match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            encoder
                .write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| AnonymizeError::EncodeError(e.to_string()))?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut buffer);
            encoder
                .write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| AnonymizeError::EncodeError(e.to_string()))?;
        }
    }

    Ok(buffer)
}

/// Detect the input image format from the raw bytes.
pub fn detect_format(input: &[u8]) -> Result<ImageFormat, AnonymizeError> {
    image::guess_format(input).map_err(|e| AnonymizeError::DecodeError(e.to_string()))
}
