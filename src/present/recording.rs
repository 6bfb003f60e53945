use super::{Presenter, StatusLevel};
use crate::aggregate::RunSummary;
use crate::frame::{AnnotatedFrame, Frame};

/// Text-bearing presenter calls, in the order they were made.
#[derive(Clone, Debug, PartialEq)]
enum PresenterEvent {
    Annotated { caption: String },
    Status { level: StatusLevel, text: String },
    Summary { summary: RunSummary },
}

/// Collects presenter calls in order. Progress ticks are not recorded.
///
/// Pixel data is kept only for the most recent original and annotated frame,
/// so long videos do not accumulate every preview in memory.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    events: Vec<PresenterEvent>,
    latest_original: Option<Frame>,
    latest_annotated: Option<AnnotatedFrame>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<(StatusLevel, &str)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PresenterEvent::Status { level, text } => Some((*level, text.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn captions(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                PresenterEvent::Annotated { caption } => Some(caption.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.events.iter().rev().find_map(|event| match event {
            PresenterEvent::Summary { summary } => Some(*summary),
            _ => None,
        })
    }

    pub fn latest_original(&self) -> Option<&Frame> {
        self.latest_original.as_ref()
    }

    pub fn latest_annotated(&self) -> Option<&AnnotatedFrame> {
        self.latest_annotated.as_ref()
    }

    pub fn take_latest_annotated(&mut self) -> Option<AnnotatedFrame> {
        self.latest_annotated.take()
    }
}

impl Presenter for RecordingPresenter {
    fn show_original(&mut self, frame: &Frame) {
        self.latest_original = Some(frame.clone());
    }

    fn show_annotated(&mut self, annotated: &AnnotatedFrame, caption: &str) {
        self.events.push(PresenterEvent::Annotated {
            caption: caption.to_string(),
        });
        self.latest_annotated = Some(annotated.clone());
    }

    fn show_status(&mut self, level: StatusLevel, text: &str) {
        self.events.push(PresenterEvent::Status {
            level,
            text: text.to_string(),
        });
    }

    fn show_summary(&mut self, summary: &RunSummary) {
        self.events.push(PresenterEvent::Summary { summary: *summary });
    }

    // Annotated previews already mark progress.
    fn show_progress(&mut self, _current: u64, _estimated_total: Option<u64>) {}
}
