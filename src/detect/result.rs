use serde::Serialize;

/// One candidate box as the model reports it. Pixel coordinates, top-left origin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoxCandidate {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

/// Raw model output for one frame, in the model's native ordering.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelOutput {
    pub boxes: Vec<BoxCandidate>,
}

impl ModelOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Fill state derived from a detection label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinState {
    Full,
    Empty,
    /// The label matched neither vocabulary; reported verbatim.
    Unrecognized,
}

/// The single detection surfaced for a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub state: BinState,
}
