use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use image::codecs::gif::GifEncoder;
use image::{Delay, Rgba, RgbaImage};
use tempfile::tempdir;

use binsight::config::{AppConfig, BackendKind, VideoSettings};
use binsight::present::RecordingPresenter;
use binsight::{
    AnalysisError, AnalysisReport, Annotator, DetectorBackend, Frame, LabelVocabulary,
    ModelArtifact, ModelOutput, ModelService, Pipeline, PipelineState, StatusLevel, StubBackend,
    Upload,
};

const RED: [u8; 4] = [250, 10, 10, 255];
const BLUE: [u8; 4] = [10, 20, 230, 255];
const GREY: [u8; 4] = [128, 128, 128, 255];

fn gif_bytes(colours: &[[u8; 4]]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        let frames = colours.iter().map(|colour| {
            let img = RgbaImage::from_pixel(16, 12, Rgba(*colour));
            image::Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(40, 1))
        });
        encoder.encode_frames(frames).expect("encode gif");
    }
    bytes
}

fn write_model(dir: &Path) -> PathBuf {
    let path = dir.join("best.onnx");
    std::fs::write(&path, b"stub weights").expect("write model");
    path
}

fn stub_service(dir: &Path) -> Arc<ModelService> {
    let mut cfg = AppConfig::default();
    cfg.model.path = write_model(dir);
    cfg.model.backend = BackendKind::Stub;
    Arc::new(ModelService::load(&cfg).expect("load stub model"))
}

fn video_settings(scratch: &Path) -> VideoSettings {
    VideoSettings {
        scratch_dir: Some(scratch.to_path_buf()),
        ..VideoSettings::default()
    }
}

fn scratch_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).expect("read scratch").next().is_none()
}

/// Fails on every `fail_every`-th call, otherwise behaves like the stub.
struct FlakyBackend {
    inner: StubBackend,
    calls: AtomicU64,
    fail_every: u64,
}

impl DetectorBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn detect(&self, frame: &Frame) -> anyhow::Result<ModelOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(anyhow!("device lost on call {call}"));
        }
        self.inner.detect(frame)
    }
}

#[test]
fn ten_frame_video_with_five_full_frames() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let mut colours = vec![RED; 5];
    colours.extend(vec![GREY; 5]);
    let upload = Upload::new("bins.gif", gif_bytes(&colours));

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    let mut presenter = RecordingPresenter::new();
    let report = pipeline.analyze(&upload, &mut presenter).expect("analyze");

    let summary = report.summary().copied().expect("video summary");
    assert_eq!(summary.full_count(), 5);
    assert_eq!(summary.empty_count(), 0);
    assert_eq!(summary.frames_processed(), 10);
    assert_eq!(presenter.summary(), Some(summary));
    assert_eq!(pipeline.state(), PipelineState::Done);

    assert_eq!(presenter.captions().len(), 10);
    assert_eq!(presenter.captions()[0], "Frame 1");
    assert_eq!(
        presenter.statuses().last().copied(),
        Some((StatusLevel::Success, "Video analysed successfully (10 frames)"))
    );
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn frames_processed_matches_decodable_frames() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let service = stub_service(model_dir.path());

    for k in [1usize, 3, 7] {
        let mut colours = vec![BLUE; k];
        if k > 2 {
            colours[1] = GREY;
        }
        let upload = Upload::new("clip.gif", gif_bytes(&colours));
        let mut pipeline = Pipeline::new(service.clone(), video_settings(scratch.path()));
        let report = pipeline
            .analyze(&upload, &mut RecordingPresenter::new())
            .expect("analyze");
        let summary = report.summary().copied().unwrap();
        assert_eq!(summary.frames_processed(), k as u64);
        assert!(summary.full_count() + summary.empty_count() <= k as u64);
        assert_eq!(summary.full_count(), 0);
    }
}

#[test]
fn corrupted_container_fails_and_removes_scratch_file() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let upload = Upload::new("broken.gif", b"GIF89a but not really".to_vec());

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()));
    let mut presenter = RecordingPresenter::new();
    let err = pipeline.analyze(&upload, &mut presenter).unwrap_err();

    assert!(matches!(err, AnalysisError::CannotOpen(_)));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(scratch_is_empty(scratch.path()));
    assert!(presenter.summary().is_none());
    let statuses = presenter.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, StatusLevel::Error);
}

#[test]
fn unreadable_first_frame_counts_as_cannot_open() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let mut bytes = gif_bytes(&[RED]);
    bytes.truncate(bytes.len() - 4);
    let upload = Upload::new("single.gif", bytes);

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()));
    let mut presenter = RecordingPresenter::new();
    let err = pipeline.analyze(&upload, &mut presenter).unwrap_err();

    assert!(matches!(err, AnalysisError::CannotOpen(_)));
    assert!(presenter.captions().is_empty());
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn mid_stream_decode_error_discards_partial_results() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let mut bytes = gif_bytes(&[RED, BLUE, RED, BLUE, RED, BLUE, RED, BLUE]);
    // Drop the trailer and the tail of the last frame's image data.
    bytes.truncate(bytes.len() - 4);
    let upload = Upload::new("cut.gif", bytes);

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()));
    let mut presenter = RecordingPresenter::new();
    let err = pipeline.analyze(&upload, &mut presenter).unwrap_err();

    assert!(matches!(err, AnalysisError::DecodeError { frame: 8, .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(presenter.summary().is_none());
    assert_eq!(presenter.captions().len(), 7);
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn inference_failures_are_counted_and_the_run_continues() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let artifact = ModelArtifact::load(&write_model(model_dir.path()), "best.onnx").unwrap();
    let backend = FlakyBackend {
        inner: StubBackend::new(["pleine", "vide"]),
        calls: AtomicU64::new(0),
        fail_every: 2,
    };
    let service = ModelService::with_backend(
        artifact,
        Box::new(backend),
        Annotator::default(),
        LabelVocabulary::default(),
    )
    .unwrap();

    let upload = Upload::new("bins.gif", gif_bytes(&[RED; 4]));
    let mut pipeline = Pipeline::new(Arc::new(service), video_settings(scratch.path()));
    let mut presenter = RecordingPresenter::new();
    let report = pipeline.analyze(&upload, &mut presenter).expect("analyze");

    match report {
        AnalysisReport::Video {
            summary,
            inference_failures,
            ..
        } => {
            assert_eq!(summary.frames_processed(), 4);
            assert_eq!(summary.full_count(), 2);
            assert_eq!(inference_failures, 2);
        }
        other => panic!("expected a video report, got {other:?}"),
    }
    assert!(presenter
        .statuses()
        .iter()
        .any(|(level, text)| *level == StatusLevel::Warning && text.contains("2 of 4")));
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn previews_are_strided_and_capped() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let settings = VideoSettings {
        scratch_dir: Some(scratch.path().to_path_buf()),
        preview_every: 2,
        max_preview_frames: 3,
    };
    let upload = Upload::new("long.gif", gif_bytes(&[GREY; 10]));

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), settings);
    let mut presenter = RecordingPresenter::new();
    let report = pipeline.analyze(&upload, &mut presenter).expect("analyze");

    assert_eq!(presenter.captions(), vec!["Frame 1", "Frame 3", "Frame 5"]);
    assert!(matches!(report, AnalysisReport::Video { previews: 3, .. }));
}

#[test]
fn interruption_fails_the_run_and_cleans_up() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let upload = Upload::new("bins.gif", gif_bytes(&[RED; 3]));

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()))
        .with_interrupt(flag);
    let err = pipeline
        .analyze(&upload, &mut RecordingPresenter::new())
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Interrupted { frames: 0 }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(scratch_is_empty(scratch.path()));
}

#[cfg(not(feature = "decode-ffmpeg"))]
#[test]
fn container_without_decoder_cannot_open() {
    let model_dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let upload = Upload::new("clip.mp4", vec![0u8; 64]);

    let mut pipeline = Pipeline::new(stub_service(model_dir.path()), video_settings(scratch.path()));
    let err = pipeline
        .analyze(&upload, &mut RecordingPresenter::new())
        .unwrap_err();
    assert!(matches!(err, AnalysisError::CannotOpen(_)));
    assert!(scratch_is_empty(scratch.path()));
}
