use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoxCandidate, ModelOutput};
use crate::frame::Frame;

/// Minimum share of pixels that must carry the key colour.
const MIN_COVERAGE: f32 = 0.2;

/// Deterministic stand-in for a trained model.
///
/// Pixels that are strongly red vote for class 0, strongly blue for class 1.
/// When either colour covers enough of the frame, a single box is reported
/// around those pixels with the coverage as confidence. Anything else yields
/// no boxes. Used for tests, demos and smoke-testing a deployment without
/// model weights.
pub struct StubBackend {
    class_names: Vec<String>,
}

impl StubBackend {
    pub fn new<I, S>(class_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class_names: class_names.into_iter().map(Into::into).collect(),
        }
    }

    fn label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(["full", "empty"])
    }
}

#[derive(Default)]
struct Extent {
    count: u64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Extent {
    fn add(&mut self, x: u32, y: u32) {
        if self.count == 0 {
            (self.min_x, self.min_y, self.max_x, self.max_y) = (x, y, x, y);
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
        self.count += 1;
    }
}

fn is_key_red(px: &[u8]) -> bool {
    px[0] >= 160 && px[1] <= 90 && px[2] <= 90
}

fn is_key_blue(px: &[u8]) -> bool {
    px[2] >= 160 && px[0] <= 90 && px[1] <= 90
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame) -> Result<ModelOutput> {
        let width = frame.width();
        let total = width as u64 * frame.height() as u64;
        if total == 0 {
            return Ok(ModelOutput::empty());
        }

        let mut red = Extent::default();
        let mut blue = Extent::default();
        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            let x = (i as u64 % width as u64) as u32;
            let y = (i as u64 / width as u64) as u32;
            if is_key_red(px) {
                red.add(x, y);
            } else if is_key_blue(px) {
                blue.add(x, y);
            }
        }

        let (class_id, extent) = if red.count >= blue.count {
            (0, red)
        } else {
            (1, blue)
        };
        let coverage = extent.count as f32 / total as f32;
        if extent.count == 0 || coverage < MIN_COVERAGE {
            return Ok(ModelOutput::empty());
        }

        Ok(ModelOutput {
            boxes: vec![BoxCandidate {
                x: extent.min_x as f32,
                y: extent.min_y as f32,
                w: (extent.max_x - extent.min_x + 1) as f32,
                h: (extent.max_y - extent.min_y + 1) as f32,
                confidence: coverage.min(1.0),
                class_id,
                label: self.label(class_id),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawImage;
    use crate::ingest::normalize;

    fn solid(rgb: [u8; 3], width: u32, height: u32) -> Frame {
        let data = rgb.repeat((width * height) as usize);
        normalize(RawImage::rgb(data, width, height)).unwrap()
    }

    #[test]
    fn red_frames_report_class_zero() {
        let backend = StubBackend::new(["pleine", "vide"]);
        let output = backend.detect(&solid([250, 10, 10], 4, 3)).unwrap();
        assert_eq!(output.boxes.len(), 1);
        let b = &output.boxes[0];
        assert_eq!(b.label, "pleine");
        assert_eq!((b.x, b.y, b.w, b.h), (0.0, 0.0, 4.0, 3.0));
        assert_eq!(b.confidence, 1.0);
    }

    #[test]
    fn blue_frames_report_class_one() {
        let backend = StubBackend::default();
        let output = backend.detect(&solid([5, 20, 220], 2, 2)).unwrap();
        assert_eq!(output.boxes[0].label, "empty");
        assert_eq!(output.boxes[0].class_id, 1);
    }

    #[test]
    fn neutral_frames_report_nothing() {
        let backend = StubBackend::default();
        assert!(backend.detect(&solid([128, 128, 128], 5, 5)).unwrap().is_empty());
    }

    #[test]
    fn missing_class_names_fall_back_to_ids() {
        let backend = StubBackend::new(Vec::<String>::new());
        let output = backend.detect(&solid([250, 0, 0], 1, 1)).unwrap();
        assert_eq!(output.boxes[0].label, "class_0");
    }
}
