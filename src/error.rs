//! Error taxonomy for analysis runs.
//!
//! Open and decode failures abort the current run. Per-frame inference
//! failures never reach this type as a hard error during a run: the detector
//! adapter converts them into a fallback outcome and the run continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The model artifact is missing or could not be loaded. Startup-fatal.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The upload is not an accepted image/video type or has an unusable pixel layout.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The video container could not be parsed.
    #[error("cannot open video: {0}")]
    CannotOpen(String),

    /// A frame could not be decoded mid-stream.
    #[error("decode error at frame {frame}: {reason}")]
    DecodeError { frame: u64, reason: String },

    /// The model invocation failed for one frame.
    #[error("inference failed: {0}")]
    InferenceError(String),

    /// The run was interrupted before the frame source was exhausted.
    #[error("analysis interrupted after {frames} frames")]
    Interrupted { frames: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Short machine-readable code used by the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::ModelUnavailable(_) => "model_unavailable",
            AnalysisError::UnsupportedFormat(_) => "unsupported_format",
            AnalysisError::CannotOpen(_) => "cannot_open",
            AnalysisError::DecodeError { .. } => "decode_error",
            AnalysisError::InferenceError(_) => "inference_error",
            AnalysisError::Interrupted { .. } => "interrupted",
            AnalysisError::Io(_) => "io_error",
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
