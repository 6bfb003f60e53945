//! binsight: waste bin fill-level detection over uploaded images and videos.
//!
//! An upload is routed by extension into image or video mode, decoded into
//! RGB frames, run through an object-detection model and reported through a
//! `Presenter`. Video runs are tallied into a `RunSummary` of full and empty
//! frames.
//!
//! # Module Structure
//!
//! - `ingest`: upload classification, `normalize`, `FrameSource`
//! - `detect`: `DetectorBackend` seam, `DetectorAdapter`, label policy
//! - `annotate`: box/label rendering
//! - `model`: the immutable, process-wide `ModelService`
//! - `aggregate`: per-run counters
//! - `pipeline`: the analysis state machine
//! - `present`: presenter trait, status texts, console/recording presenters
//! - `config`, `api`: configuration and the HTTP surface

pub mod aggregate;
pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod present;

pub use aggregate::{RunSummary, RunTally};
pub use annotate::Annotator;
pub use config::AppConfig;
pub use detect::{
    select_primary_detection, BinState, BoxCandidate, Detection, DetectorAdapter,
    DetectorBackend, InferenceOutcome, LabelVocabulary, ModelOutput, StubBackend,
};
pub use error::{AnalysisError, AnalysisResult};
pub use frame::{AnnotatedFrame, ChannelOrder, Frame, RawImage};
pub use ingest::{decode_image, media_kind, normalize, FrameSource, MediaKind, Upload};
pub use model::{ModelArtifact, ModelService};
pub use pipeline::{AnalysisReport, Pipeline, PipelineState};
pub use present::{Presenter, StatusLevel};
