//! Pipeline driver.
//!
//! One `analyze` call processes one upload start to finish:
//!
//! ```text
//! Idle -> Acquiring -> Detecting(n) <-> Aggregating(n) -> Done
//!              \____________\_______________\__________-> Failed
//! ```
//!
//! Video frames are decoded, inferred and tallied strictly one after another.
//! Open and decode errors abort the run; the frame source is dropped on every
//! exit path so its scratch file never outlives the call. Per-frame inference
//! failures do not abort: the adapter's fallback is counted as a frame with no
//! detection and the run continues.
//!
//! A pipeline that finished in `Done` or `Failed` returns to `Idle` when the
//! next upload arrives.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aggregate::{RunSummary, RunTally};
use crate::config::VideoSettings;
use crate::detect::{Detection, InferenceOutcome};
use crate::error::{AnalysisError, AnalysisResult};
use crate::ingest::{decode_image, FrameSource, MediaKind, Upload};
use crate::model::ModelService;
use crate::present::{
    caption_for, frame_caption, inference_failed_status, status_for_detection,
    video_done_status, Presenter, StatusLevel,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Acquiring,
    Detecting(u64),
    Aggregating(u64),
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Acquiring => "acquiring",
            PipelineState::Detecting(_) => "detecting",
            PipelineState::Aggregating(_) => "aggregating",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// What a successful run produced.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisReport {
    Image {
        detection: Option<Detection>,
        caption: String,
        /// Set when the model failed and the original frame was shown instead.
        inference_error: Option<String>,
    },
    Video {
        summary: RunSummary,
        previews: u64,
        inference_failures: u64,
    },
}

impl AnalysisReport {
    pub fn kind(&self) -> MediaKind {
        match self {
            AnalysisReport::Image { .. } => MediaKind::Image,
            AnalysisReport::Video { .. } => MediaKind::Video,
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            AnalysisReport::Video { summary, .. } => Some(summary),
            AnalysisReport::Image { .. } => None,
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            AnalysisReport::Image { detection, .. } => detection.as_ref(),
            AnalysisReport::Video { .. } => None,
        }
    }
}

pub struct Pipeline {
    model: Arc<ModelService>,
    video: VideoSettings,
    interrupt: Option<Arc<AtomicBool>>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(model: Arc<ModelService>, video: VideoSettings) -> Self {
        Self {
            model,
            video,
            interrupt: None,
            state: PipelineState::Idle,
        }
    }

    /// Checked before and after image inference and between video frames;
    /// when set the run fails with `Interrupted`.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Analyze one upload and report to `presenter`.
    ///
    /// On error the state ends in `Failed`, an error status has been shown and
    /// nothing computed during the run is returned.
    pub fn analyze(
        &mut self,
        upload: &Upload,
        presenter: &mut dyn Presenter,
    ) -> AnalysisResult<AnalysisReport> {
        if self.state.is_terminal() {
            self.transition(PipelineState::Idle);
        }
        self.transition(PipelineState::Acquiring);
        let result = upload.kind().and_then(|kind| {
            log::info!(
                "analyzing {} ({:?}, {} bytes)",
                upload.file_name,
                kind,
                upload.bytes.len()
            );
            match kind {
                MediaKind::Image => self.run_image(upload, presenter),
                MediaKind::Video => self.run_video(upload, presenter),
            }
        });

        match result {
            Ok(report) => {
                self.transition(PipelineState::Done);
                Ok(report)
            }
            Err(err) => {
                self.transition(PipelineState::Failed);
                log::error!("analysis of {} failed: {}", upload.file_name, err);
                presenter.show_status(StatusLevel::Error, &format!("Analysis failed: {err}"));
                Err(err)
            }
        }
    }

    fn run_image(
        &mut self,
        upload: &Upload,
        presenter: &mut dyn Presenter,
    ) -> AnalysisResult<AnalysisReport> {
        self.check_interrupt(0)?;
        let frame = decode_image(&upload.bytes)?;
        presenter.show_original(&frame);

        self.transition(PipelineState::Detecting(1));
        let outcome = self.model.adapter().infer(&frame);
        self.check_interrupt(1)?;
        match outcome {
            InferenceOutcome::Completed {
                annotated,
                detection,
            } => {
                let caption = caption_for(detection.as_ref());
                presenter.show_annotated(&annotated, &caption);
                let (level, text) = status_for_detection(detection.as_ref());
                presenter.show_status(level, &text);
                Ok(AnalysisReport::Image {
                    detection,
                    caption,
                    inference_error: None,
                })
            }
            InferenceOutcome::Failed { fallback, error } => {
                log::warn!("{}: {}", upload.file_name, error);
                let caption = caption_for(None);
                presenter.show_annotated(&fallback, &caption);
                let reason = failure_reason(&error);
                presenter.show_status(StatusLevel::Error, &inference_failed_status(&reason));
                Ok(AnalysisReport::Image {
                    detection: None,
                    caption,
                    inference_error: Some(reason),
                })
            }
        }
    }

    fn run_video(
        &mut self,
        upload: &Upload,
        presenter: &mut dyn Presenter,
    ) -> AnalysisResult<AnalysisReport> {
        let mut source = FrameSource::open(upload, self.video.scratch_dir.as_deref())?;
        let estimated_total = source.estimated_total();
        let preview_every = self.video.preview_every.max(1);

        let mut tally = RunTally::new();
        let mut previews = 0u64;
        let mut failures = 0u64;
        loop {
            self.check_interrupt(tally.frames_processed())?;
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let index = tally.frames_processed() + 1;

            self.transition(PipelineState::Detecting(index));
            let outcome = self.model.adapter().infer(&frame);
            if let InferenceOutcome::Failed { error, .. } = &outcome {
                failures += 1;
                log::warn!("{} frame {}: {}", upload.file_name, index, error);
            }

            self.transition(PipelineState::Aggregating(index));
            tally.accumulate(outcome.detection());

            if (index - 1) % preview_every == 0 && previews < self.video.max_preview_frames {
                presenter.show_annotated(outcome.annotated(), &frame_caption(index));
                previews += 1;
            }
            presenter.show_progress(index, estimated_total);
        }
        source.close()?;

        let summary = tally.finalize();
        log::info!(
            "{}: {} frames, {} full, {} empty, {} inference failures",
            upload.file_name,
            summary.frames_processed(),
            summary.full_count(),
            summary.empty_count(),
            failures
        );
        presenter.show_summary(&summary);
        if failures > 0 {
            presenter.show_status(
                StatusLevel::Warning,
                &format!(
                    "Inference failed on {} of {} frames",
                    failures,
                    summary.frames_processed()
                ),
            );
        }
        presenter.show_status(StatusLevel::Success, &video_done_status(&summary));
        Ok(AnalysisReport::Video {
            summary,
            previews,
            inference_failures: failures,
        })
    }

    fn check_interrupt(&self, frames: u64) -> AnalysisResult<()> {
        let interrupted = self
            .interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if interrupted {
            return Err(AnalysisError::Interrupted { frames });
        }
        Ok(())
    }

    fn transition(&mut self, next: PipelineState) {
        log::trace!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn failure_reason(error: &AnalysisError) -> String {
    match error {
        AnalysisError::InferenceError(reason) => reason.clone(),
        other => other.to_string(),
    }
}
