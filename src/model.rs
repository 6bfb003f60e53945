//! Process-wide model service.
//!
//! Built once at startup from configuration and shared read-only afterwards
//! (`Arc<ModelService>`). Construction fails with `ModelUnavailable` when the
//! artifact is missing or the backend cannot be loaded, before any upload is
//! accepted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::annotate::Annotator;
use crate::config::{AppConfig, BackendKind, ModelSettings};
use crate::detect::{DetectorAdapter, DetectorBackend, LabelVocabulary, StubBackend};
use crate::error::{AnalysisError, AnalysisResult};

/// The model file as served to clients for download.
#[derive(Clone, Debug)]
pub struct ModelArtifact {
    path: PathBuf,
    download_name: String,
    sha256: String,
    bytes: Arc<[u8]>,
}

impl ModelArtifact {
    pub fn load(path: &Path, download_name: &str) -> AnalysisResult<Self> {
        if !path.is_file() {
            return Err(AnalysisError::ModelUnavailable(format!(
                "model file not found at {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            AnalysisError::ModelUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Ok(Self {
            path: path.to_path_buf(),
            download_name: download_name.to_string(),
            sha256,
            bytes: bytes.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name offered to clients downloading the artifact.
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    /// Lowercase hex SHA-256 of the artifact bytes.
    pub fn sha256_hex(&self) -> &str {
        &self.sha256
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Loaded model plus the adapter that runs it. Immutable after construction.
pub struct ModelService {
    artifact: ModelArtifact,
    adapter: DetectorAdapter,
}

impl ModelService {
    /// Load the artifact and backend named by `cfg`.
    pub fn load(cfg: &AppConfig) -> AnalysisResult<Self> {
        let artifact = ModelArtifact::load(&cfg.model.path, &cfg.model.download_name)?;
        let backend = build_backend(&cfg.model)?;

        let mut annotator = Annotator::new(cfg.annotate.line_thickness);
        if let Some(font_path) = &cfg.annotate.font_path {
            annotator = match Annotator::new(cfg.annotate.line_thickness).with_font_file(font_path) {
                Ok(with_font) => with_font,
                Err(err) => {
                    log::warn!("label font unavailable, drawing boxes only: {err:#}");
                    annotator
                }
            };
        }
        let vocabulary = LabelVocabulary::new(&cfg.labels.full, &cfg.labels.empty);

        Self::with_backend(artifact, backend, annotator, vocabulary)
    }

    /// Assemble a service around an already-built backend. Runs warm-up.
    pub fn with_backend(
        artifact: ModelArtifact,
        backend: Box<dyn DetectorBackend>,
        annotator: Annotator,
        vocabulary: LabelVocabulary,
    ) -> AnalysisResult<Self> {
        let adapter = DetectorAdapter::new(backend, annotator, vocabulary);
        adapter.warm_up().map_err(|err| {
            AnalysisError::ModelUnavailable(format!(
                "{} backend failed warm-up: {err:#}",
                adapter.backend_name()
            ))
        })?;
        log::info!(
            "model loaded: {} ({} bytes, sha256 {}, backend {})",
            artifact.path().display(),
            artifact.len(),
            artifact.sha256_hex(),
            adapter.backend_name()
        );
        log::info!(
            "labels: full {:?}, empty {:?}, label text {}",
            adapter.vocabulary().full_words(),
            adapter.vocabulary().empty_words(),
            if adapter.draws_labels() { "on" } else { "off" }
        );
        Ok(Self { artifact, adapter })
    }

    pub fn adapter(&self) -> &DetectorAdapter {
        &self.adapter
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }
}

fn build_backend(settings: &ModelSettings) -> AnalysisResult<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Stub => {
            log::warn!("stub backend selected: detections are colour-keyed, not model output");
            Ok(Box::new(StubBackend::new(&settings.class_names)))
        }
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => {
            let backend = crate::detect::TractBackend::new(
                &settings.path,
                settings.input_size,
                settings.class_names.clone(),
            )
            .map_err(|err| AnalysisError::ModelUnavailable(format!("{err:#}")))?
            .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(AnalysisError::ModelUnavailable(
            "tract backend requested but binsight was built without the backend-tract feature"
                .to_string(),
        )),
    }
}
