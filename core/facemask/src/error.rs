use thiserror::Error;

/// Errors surfaced to callers of [`crate::Anonymizer`].
#[derive(Debug, Error)]
pub enum AnonymizeError {
    /// The input bytes are not a decodable raster image.
    #[error("failed to decode image: {0}")]
    DecodeError(String),

    /// The image decoded to zero width or height.
    #[error("image dimensions are zero")]
    ZeroDimensions,

    /// The processed buffer could not be encoded.
    #[error("failed to encode image: {0}")]
    EncodeError(String),

    /// JPEG quality outside 1-100.
    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    /// Pixelation block size of zero.
    #[error("pixelate size must be > 0")]
    InvalidPixelateSize,

    /// Blur kernel larger than [`crate::transform::MAX_BLUR_STRENGTH`].
    #[error(
        "blur strength must be at most {max}, got {0}",
        max = crate::transform::MAX_BLUR_STRENGTH
    )]
    InvalidBlurStrength(u32),

    /// Detection dimension of zero.
    #[error("max dimension must be > 0")]
    InvalidMaxDimension,

    /// Confidence threshold outside the open interval (0, 1).
    #[error("confidence threshold must be strictly between 0.0 and 1.0, got {0}")]
    InvalidConfidence(f32),

    /// Fetching or storing a stored image failed.
    #[error("byte store error: {0}")]
    Store(#[from] StoreError),
}

impl AnonymizeError {
    /// Whether the error was caused by the request rather than the service.
    ///
    /// Undecodable input and invalid options are the caller's fault; encode
    /// failures and storage I/O are not. A missing stored object counts as a
    /// client error.
    pub fn is_client_error(&self) -> bool {
        match self {
            AnonymizeError::DecodeError(_)
            | AnonymizeError::ZeroDimensions
            | AnonymizeError::InvalidQuality(_)
            | AnonymizeError::InvalidPixelateSize
            | AnonymizeError::InvalidBlurStrength(_)
            | AnonymizeError::InvalidMaxDimension
            | AnonymizeError::InvalidConfidence(_) => true,
            AnonymizeError::EncodeError(_) => false,
            AnonymizeError::Store(e) => {
                matches!(e, StoreError::NotFound(_) | StoreError::InvalidPath(_))
            }
        }
    }
}

/// Failures of the external anonymization engine.
///
/// These never reach [`crate::Anonymizer::process`] callers; the orchestrator
/// converts every variant into a fallback to the manual path.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is not installed or not configured.
    #[error("external engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran and reported a failure.
    #[error("external engine failed: {0}")]
    Execution(String),

    /// Staging files for the engine failed.
    #[error("external engine staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a face detection backend. Detection degrades to "no faces" on any of these.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model file is missing or unreadable.
    #[error("failed to load face detection model: {0}")]
    Load(String),

    /// The forward pass failed.
    #[error("face detection inference failed: {0}")]
    Inference(String),

    /// The network returned a tensor of unexpected shape.
    #[error("unexpected face detection output: {0}")]
    Output(String),
}

/// Failures of a [`crate::store::ByteStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object at the given path.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The path is empty, absolute, or escapes the store.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// Underlying storage I/O failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors() {
        assert!(AnonymizeError::DecodeError("bad".into()).is_client_error());
        assert!(AnonymizeError::InvalidQuality(0).is_client_error());
        assert!(AnonymizeError::InvalidBlurStrength(100_000).is_client_error());
        assert!(AnonymizeError::Store(StoreError::NotFound("a.jpg".into())).is_client_error());
        assert!(!AnonymizeError::EncodeError("oom".into()).is_client_error());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!AnonymizeError::Store(StoreError::Io(io)).is_client_error());
    }
}
