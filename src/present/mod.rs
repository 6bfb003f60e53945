//! Presenter seam.
//!
//! The pipeline reports everything it shows through `Presenter`: the
//! normalized original, annotated frames with captions, status lines, the
//! final run summary and progress. The text helpers here are shared by every
//! presenter so the CLI and the HTTP surface say the same thing.

mod console;
mod recording;

pub use console::{ConsolePresenter, UiMode};
pub use recording::RecordingPresenter;

use serde::Serialize;

use crate::aggregate::RunSummary;
use crate::detect::{BinState, Detection};
use crate::frame::{AnnotatedFrame, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Success => "success",
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        }
    }
}

pub trait Presenter {
    /// The normalized input image, before any inference.
    fn show_original(&mut self, frame: &Frame);

    fn show_annotated(&mut self, annotated: &AnnotatedFrame, caption: &str);

    fn show_status(&mut self, level: StatusLevel, text: &str);

    fn show_summary(&mut self, summary: &RunSummary);

    /// `current` frames done out of an estimated total, when the container has one.
    fn show_progress(&mut self, current: u64, estimated_total: Option<u64>);
}

/// Status line for a single-image result.
pub fn status_for_detection(detection: Option<&Detection>) -> (StatusLevel, String) {
    match detection {
        Some(d) => match d.state {
            BinState::Full => (StatusLevel::Success, "Bin detected: FULL".to_string()),
            BinState::Empty => (StatusLevel::Info, "Bin detected: EMPTY".to_string()),
            BinState::Unrecognized => (StatusLevel::Warning, format!("Detected: {}", d.label)),
        },
        None => (StatusLevel::Error, "No detection: no bin found".to_string()),
    }
}

/// Caption under the annotated image.
pub fn caption_for(detection: Option<&Detection>) -> String {
    match detection {
        Some(d) => format!("Prediction: {}", d.label),
        None => "Prediction: no bin detected".to_string(),
    }
}

/// Caption for a video preview frame, 1-based.
pub fn frame_caption(index: u64) -> String {
    format!("Frame {index}")
}

pub fn video_done_status(summary: &RunSummary) -> String {
    format!(
        "Video analysed successfully ({} frames)",
        summary.frames_processed()
    )
}

pub fn inference_failed_status(reason: &str) -> String {
    format!("Inference failed: {reason}")
}
