#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoxCandidate, ModelOutput};
use crate::frame::Frame;

const LETTERBOX_FILL: u8 = 114;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// Expects a `[1, 3, S, S]` float input and a `[1, 4 + nc, N]` output of
/// centre-format boxes followed by per-class scores. Frames are letterboxed
/// to `S x S`; boxes are mapped back to frame pixels. Output order is
/// descending confidence after per-class NMS, as the exporter emits it.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, class_names: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and NMS IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let side = self.input_size;
        let source = frame.to_rgb_image()?;
        let (w, h) = source.dimensions();
        if w == 0 || h == 0 {
            return Err(anyhow!("frame has no pixels"));
        }
        let scale = (side as f32 / w as f32).min(side as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, side);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, side);
        let resized = imageops::resize(&source, new_w, new_h, FilterType::Triangle);

        let pad_x = (side - new_w) / 2;
        let pad_y = (side - new_h) / 2;
        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(&self, outputs: TVec<TValue>, letterbox: &Letterbox, frame: &Frame) -> Result<Vec<BoxCandidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("reshape model output")?;
        let num_classes = shape[1] - 4;
        let anchors = shape[2];
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score.is_nan() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, bw, bh) = (view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            let x0 = ((cx - bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, fw);
            let y0 = ((cy - bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, fh);
            let x1 = ((cx + bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, fw);
            let y1 = ((cy + bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, fh);
            candidates.push(BoxCandidate {
                x: x0,
                y: y0,
                w: x1 - x0,
                h: y1 - y0,
                confidence: score.min(1.0),
                class_id,
                label: self
                    .class_names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{class_id}")),
            });
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame) -> Result<ModelOutput> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.decode(outputs, &letterbox, frame)?;
        Ok(ModelOutput { boxes })
    }

    fn warm_up(&self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side));
        self.model
            .run(tvec!(blank.into_tensor().into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}

/// Per-class greedy NMS. Result is sorted by descending confidence.
fn non_max_suppression(mut boxes: Vec<BoxCandidate>, iou_threshold: f32) -> Vec<BoxCandidate> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoxCandidate> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoxCandidate, b: &BoxCandidate) -> f32 {
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let x1 = (a.x + a.w).min(b.x + b.w);
    let y1 = (a.y + a.h).min(b.y + b.h);
    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
