use image::RgbImage;
use tracing::{debug, warn};

use crate::codec;
use crate::engine::{run_staged, EngineOutcome, ExternalEngine};
use crate::error::AnonymizeError;
use crate::face_detector::{Detector, FaceBox};
use crate::options::AnonymizeOptions;
use crate::transform::transform;
use crate::{ProcessingPath, ProcessingResult};

/// Full pipeline: external engine when enabled, otherwise (or on any engine
/// failure) decode -> detect -> transform -> encode.
pub(crate) fn process(
    detector: &Detector,
    engine: Option<&dyn ExternalEngine>,
    options: &AnonymizeOptions,
    input: &[u8],
) -> Result<ProcessingResult, AnonymizeError> {
    // Undecodable input is rejected up front, whichever path would run.
    let image = codec::decode(input)?;

    if let Some(engine) = engine.filter(|_| options.use_engine) {
        match run_staged(engine, input, &options.engine_params()) {
            EngineOutcome::Anonymized(data) => {
                let face_count = detect(detector, &image, options).len();
                debug!(face_count, "external engine anonymized image");
                return Ok(ProcessingResult {
                    data,
                    face_count,
                    path: ProcessingPath::ExternalEngine,
                });
            }
            EngineOutcome::NoDetections => {
                debug!("external engine found no faces, passing image through");
                return Ok(ProcessingResult {
                    data: input.to_vec(),
                    face_count: 0,
                    path: ProcessingPath::ExternalEngine,
                });
            }
            EngineOutcome::Unavailable(e) => {
                debug!(error = %e, "external engine unavailable, using manual path");
            }
            EngineOutcome::Failed(e) => {
                warn!(error = %e, "external engine failed, falling back to manual path");
            }
        }
    }

    anonymize_decoded(detector, options, input, &image)
}

/// Decode, detect, anonymize, encode. Images without faces are returned byte-for-byte.
#[cfg(test)]
pub(crate) fn process_manual(
    detector: &Detector,
    options: &AnonymizeOptions,
    input: &[u8],
) -> Result<ProcessingResult, AnonymizeError> {
    let image = codec::decode(input)?;
    anonymize_decoded(detector, options, input, &image)
}

fn anonymize_decoded(
    detector: &Detector,
    options: &AnonymizeOptions,
    input: &[u8],
    image: &RgbImage,
) -> Result<ProcessingResult, AnonymizeError> {
    let boxes = detect(detector, image, options);

    if boxes.is_empty() {
        debug!("no faces detected, passing image through");
        return Ok(ProcessingResult {
            data: input.to_vec(),
            face_count: 0,
            path: ProcessingPath::Manual,
        });
    }

    let processed = transform(image, &boxes, options.mode, options.strength());
    let data = codec::encode(&processed, &options.format, options.quality)?;

    debug!(face_count = boxes.len(), mode = ?options.mode, "manual path anonymized image");
    Ok(ProcessingResult {
        data,
        face_count: boxes.len(),
        path: ProcessingPath::Manual,
    })
}

/// On the engine path this is a separate pass over the original image, not
/// the number of regions the engine changed.
fn detect(detector: &Detector, image: &RgbImage, options: &AnonymizeOptions) -> Vec<FaceBox> {
    detector.detect(image, options.max_dimension, options.confidence_threshold)
}
