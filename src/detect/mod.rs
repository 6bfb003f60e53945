//! Detection seam.
//!
//! The model itself is external: a `DetectorBackend` turns a frame into the
//! model's native, ordered list of box candidates. Everything else here is
//! shape adaptation and result extraction:
//!
//! - `select_primary_detection`: which box becomes "the" detection.
//! - `LabelVocabulary`: label text to full/empty classification.
//! - `DetectorAdapter`: backend + annotation + fallback on failure.

mod adapter;
mod backend;
pub mod backends;
mod policy;
mod result;

pub use adapter::{DetectorAdapter, InferenceOutcome};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use policy::{select_primary_detection, LabelVocabulary};
pub use result::{BinState, BoxCandidate, Detection, ModelOutput};
