use crate::annotate::Annotator;
use crate::detect::backend::DetectorBackend;
use crate::detect::policy::{select_primary_detection, LabelVocabulary};
use crate::detect::result::Detection;
use crate::error::AnalysisError;
use crate::frame::{AnnotatedFrame, Frame};

/// Result of running the adapter on one frame.
#[derive(Debug)]
pub enum InferenceOutcome {
    /// The model ran. `detection` is `None` when it returned no boxes.
    Completed {
        annotated: AnnotatedFrame,
        detection: Option<Detection>,
    },
    /// The model failed. `fallback` is the original frame, un-boxed, and
    /// `error` is always `AnalysisError::InferenceError`.
    Failed {
        fallback: AnnotatedFrame,
        error: AnalysisError,
    },
}

impl InferenceOutcome {
    pub fn annotated(&self) -> &AnnotatedFrame {
        match self {
            InferenceOutcome::Completed { annotated, .. } => annotated,
            InferenceOutcome::Failed { fallback, .. } => fallback,
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            InferenceOutcome::Completed { detection, .. } => detection.as_ref(),
            InferenceOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, InferenceOutcome::Failed { .. })
    }
}

/// Wraps the external model: shape adaptation and result extraction only.
pub struct DetectorAdapter {
    backend: Box<dyn DetectorBackend>,
    annotator: Annotator,
    vocabulary: LabelVocabulary,
}

impl DetectorAdapter {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        annotator: Annotator,
        vocabulary: LabelVocabulary,
    ) -> Self {
        Self {
            backend,
            annotator,
            vocabulary,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    /// Whether label text is rendered next to boxes.
    pub fn draws_labels(&self) -> bool {
        self.annotator.draws_labels()
    }

    pub fn warm_up(&self) -> anyhow::Result<()> {
        self.backend.warm_up()
    }

    /// Run the model on `frame`, render every box it returned and surface the
    /// first one as the frame's detection.
    ///
    /// Never fails: model or rendering errors come back as
    /// `InferenceOutcome::Failed` carrying the original frame.
    pub fn infer(&self, frame: &Frame) -> InferenceOutcome {
        let output = match self.backend.detect(frame) {
            Ok(output) => output,
            Err(err) => return fallback(frame, format!("{err:#}")),
        };
        let annotated = match self.annotator.render(frame, &output.boxes) {
            Ok(annotated) => annotated,
            Err(err) => return fallback(frame, format!("render failed: {err:#}")),
        };
        let detection = select_primary_detection(&output.boxes).map(|primary| Detection {
            label: primary.label.clone(),
            confidence: primary.confidence.clamp(0.0, 1.0),
            state: self.vocabulary.classify(&primary.label),
        });
        InferenceOutcome::Completed {
            annotated,
            detection,
        }
    }
}

fn fallback(frame: &Frame, reason: String) -> InferenceOutcome {
    InferenceOutcome::Failed {
        fallback: AnnotatedFrame::unboxed(frame),
        error: AnalysisError::InferenceError(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BinState, BoxCandidate, ModelOutput};
    use crate::frame::RawImage;
    use crate::ingest::normalize;
    use anyhow::{anyhow, Result};

    struct FixedBackend(Vec<BoxCandidate>);

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, _frame: &Frame) -> Result<ModelOutput> {
            Ok(ModelOutput {
                boxes: self.0.clone(),
            })
        }
    }

    struct BrokenBackend;

    impl DetectorBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&self, _frame: &Frame) -> Result<ModelOutput> {
            Err(anyhow!("session exploded"))
        }
    }

    fn frame() -> Frame {
        normalize(RawImage::rgb(vec![30u8; 12 * 12 * 3], 12, 12)).unwrap()
    }

    fn boxed(label: &str, confidence: f32) -> BoxCandidate {
        BoxCandidate {
            x: 1.0,
            y: 1.0,
            w: 6.0,
            h: 6.0,
            confidence,
            class_id: 1,
            label: label.to_string(),
        }
    }

    fn adapter(backend: impl DetectorBackend + 'static) -> DetectorAdapter {
        DetectorAdapter::new(
            Box::new(backend),
            Annotator::default(),
            LabelVocabulary::default(),
        )
    }

    #[test]
    fn zero_boxes_gives_no_detection_and_unboxed_frame() {
        let adapter = adapter(FixedBackend(vec![]));
        let frame = frame();
        let outcome = adapter.infer(&frame);
        assert!(!outcome.is_failure());
        assert!(outcome.detection().is_none());
        assert_eq!(outcome.annotated(), &AnnotatedFrame::unboxed(&frame));
    }

    #[test]
    fn first_box_is_the_detection_and_all_boxes_are_drawn() {
        let adapter = adapter(FixedBackend(vec![boxed("Vide", 0.4), boxed("pleine", 0.95)]));
        let outcome = adapter.infer(&frame());
        let detection = outcome.detection().unwrap();
        assert_eq!(detection.label, "Vide");
        assert_eq!(detection.state, BinState::Empty);
        assert_eq!(outcome.annotated().boxes_drawn(), 2);
    }

    #[test]
    fn backend_errors_become_fallback_outcomes() {
        let adapter = adapter(BrokenBackend);
        let frame = frame();
        match adapter.infer(&frame) {
            InferenceOutcome::Failed { fallback, error } => {
                assert_eq!(fallback.frame(), &frame);
                assert!(matches!(error, AnalysisError::InferenceError(ref msg) if msg.contains("exploded")));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn repeated_inference_is_identical() {
        let adapter = adapter(FixedBackend(vec![boxed("full", 0.7)]));
        let frame = frame();
        let a = adapter.infer(&frame);
        let b = adapter.infer(&frame);
        assert_eq!(a.detection(), b.detection());
        assert_eq!(a.annotated(), b.annotated());
    }
}
