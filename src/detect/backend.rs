use anyhow::Result;

use crate::detect::result::ModelOutput;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one loaded model. Detection takes `&self`: the model is
/// read-only after construction and is shared across sequential requests.
/// Implementations must return boxes in the model's native order; selection
/// and classification happen downstream.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one frame.
    fn detect(&self, frame: &Frame) -> Result<ModelOutput>;

    /// Optional warm-up hook, run once at startup.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
