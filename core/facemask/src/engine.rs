//! Optional external anonymization engine.
//!
//! The engine is an opaque third-party pipeline that may produce smoother,
//! feathered anonymization than the manual path. It works on files: the
//! input is staged into a temporary directory, the engine writes its result
//! next to it, and the directory is removed on every exit path.

use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec;
use crate::error::EngineError;
use crate::Mode;

/// Environment variable naming the engine program for [`CommandEngine::from_env`].
pub const ENGINE_BIN_ENV: &str = "FACEMASK_ENGINE_BIN";

/// Anonymization modes understood by the external engine.
///
/// `Color` fills faces with a solid colour; it has no manual-path
/// counterpart and is only reachable by driving an engine directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Block mosaic.
    Pixelate,
    /// Gaussian blur.
    Blur,
    /// Solid fill.
    Color,
}

impl EngineMode {
    /// Command-line spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Pixelate => "pixelate",
            EngineMode::Blur => "blur",
            EngineMode::Color => "color",
        }
    }
}

impl From<Mode> for EngineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Pixelate => EngineMode::Pixelate,
            Mode::Blur => EngineMode::Blur,
        }
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters in the engine's own scale (see [`crate::EngineSettings`]).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    /// Anonymization applied to each face.
    pub mode: EngineMode,
    /// Detection confidence threshold.
    pub threshold: f32,
    /// Block size, already divided down from the manual-path value.
    pub pixelate_size: u32,
    /// Blur strength, already divided down from the manual-path value.
    pub blur_strength: u32,
    /// Feather region edges.
    pub soft_mask: bool,
    /// Feathering radius.
    pub soft_mask_strength: u32,
}

/// External anonymization engine.
///
/// Implementations read the image at `input` and, when they anonymized at
/// least one face, write the result to `output_dir/<input file name>`. No
/// output file means the engine found nothing to anonymize.
pub trait ExternalEngine: Send + Sync {
    /// Anonymize `input` into `output_dir`.
    fn run(&self, input: &Path, output_dir: &Path, params: &EngineParams)
        -> Result<(), EngineError>;
}

/// Result of one engine attempt. Only `Anonymized` and `NoDetections` end the pipeline.
#[derive(Debug)]
pub enum EngineOutcome {
    /// Engine output bytes, already checked to decode as an image.
    Anonymized(Vec<u8>),
    /// The engine ran and produced no output file.
    NoDetections,
    /// The engine is not installed or not configured.
    Unavailable(EngineError),
    /// The engine or its staging failed.
    Failed(EngineError),
}

/// Stage `input` in a fresh temporary directory, run `engine`, and collect its output.
pub fn run_staged(
    engine: &dyn ExternalEngine,
    input: &[u8],
    params: &EngineParams,
) -> EngineOutcome {
    let staging = match tempfile::Builder::new().prefix("facemask-").tempdir() {
        Ok(dir) => dir,
        Err(e) => return EngineOutcome::Failed(EngineError::Io(e)),
    };

    let result = run_in(engine, staging.path(), input, params);

    let staging_path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        warn!(
            path = %staging_path.display(),
            error = %e,
            "failed to remove engine staging directory"
        );
    }

    match result {
        Ok(Some(bytes)) => EngineOutcome::Anonymized(bytes),
        Ok(None) => EngineOutcome::NoDetections,
        Err(e @ EngineError::Unavailable(_)) => EngineOutcome::Unavailable(e),
        Err(e) => EngineOutcome::Failed(e),
    }
}

fn run_in(
    engine: &dyn ExternalEngine,
    staging: &Path,
    input: &[u8],
    params: &EngineParams,
) -> Result<Option<Vec<u8>>, EngineError> {
    let input_name = format!("input.{}", staged_extension(input));
    let input_path = staging.join(&input_name);
    let output_dir = staging.join("output");

    std::fs::write(&input_path, input)?;
    std::fs::create_dir(&output_dir)?;

    debug!(mode = %params.mode, input = %input_path.display(), "running external engine");
    engine.run(&input_path, &output_dir, params)?;

    let output_path = output_dir.join(&input_name);
    let bytes = match std::fs::read(&output_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EngineError::Io(e)),
    };

    // Empty or undecodable output is an engine failure, not a result.
    codec::decode(&bytes)
        .map_err(|e| EngineError::Execution(format!("engine wrote an unusable image: {e}")))?;
    Ok(Some(bytes))
}

/// File extension matching the input's content, so engines that dispatch on it see the right one.
fn staged_extension(input: &[u8]) -> &'static str {
    image::guess_format(input)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

/// Engine run as an external program.
///
/// Invoked as
/// `<program> [args...] <input> --output <dir> --mode <mode> --threshold <t>
/// --pixelate-size <n> --blur-strength <n> [--soft-mask --soft-mask-strength <n>]`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandEngine {
    /// Run `program`, resolved through `PATH` when not absolute.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Engine program from `FACEMASK_ENGINE_BIN`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(ENGINE_BIN_ENV).map(Self::new)
    }

    /// Arguments placed before the input path.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, input: &Path, output_dir: &Path, params: &EngineParams) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(input)
            .arg("--output")
            .arg(output_dir)
            .arg("--mode")
            .arg(params.mode.as_str())
            .arg("--threshold")
            .arg(params.threshold.to_string())
            .arg("--pixelate-size")
            .arg(params.pixelate_size.to_string())
            .arg("--blur-strength")
            .arg(params.blur_strength.to_string());
        if params.soft_mask {
            command
                .arg("--soft-mask")
                .arg("--soft-mask-strength")
                .arg(params.soft_mask_strength.to_string());
        }
        command
    }
}

impl ExternalEngine for CommandEngine {
    fn run(
        &self,
        input: &Path,
        output_dir: &Path,
        params: &EngineParams,
    ) -> Result<(), EngineError> {
        let output = match self.command(input, output_dir, params).output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::Unavailable(format!(
                    "{}: {e}",
                    self.program.display()
                )))
            }
            Err(e) => return Err(EngineError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Execution(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
