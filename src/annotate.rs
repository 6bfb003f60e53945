//! Burns detection boxes and labels into frame pixels.
//!
//! Rendering is deterministic: the same frame and boxes always give the same
//! pixels. Labels are drawn only when a TrueType font has been supplied;
//! otherwise boxes alone are rendered.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::BoxCandidate;
use crate::frame::{AnnotatedFrame, Frame};

const DEFAULT_THICKNESS: u32 = 2;
const LABEL_HEIGHT_PX: f32 = 16.0;
const TEXT_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);

/// Box colour per class id.
fn class_colour(class_id: usize) -> Rgb<u8> {
    const PALETTE: [[u8; 3]; 8] = [
        [255, 56, 56],
        [72, 249, 10],
        [255, 157, 151],
        [255, 112, 31],
        [255, 178, 29],
        [207, 210, 49],
        [26, 147, 52],
        [0, 194, 255],
    ];
    Rgb(PALETTE[class_id % PALETTE.len()])
}

pub struct Annotator {
    font: Option<FontVec>,
    thickness: u32,
}

impl Annotator {
    pub fn new(thickness: u32) -> Self {
        Self {
            font: None,
            thickness: thickness.max(1),
        }
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow::anyhow!("invalid font file {}", path.display()))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Render `boxes` onto a copy of `frame`.
    ///
    /// With no boxes the result is the un-boxed rendering: identical pixels.
    pub fn render(&self, frame: &Frame, boxes: &[BoxCandidate]) -> Result<AnnotatedFrame> {
        if boxes.is_empty() {
            return Ok(AnnotatedFrame::unboxed(frame));
        }
        let mut canvas = frame.to_rgb_image()?;
        let mut drawn = 0;
        for candidate in boxes {
            let Some(rect) = clamp_rect(candidate, canvas.width(), canvas.height()) else {
                continue;
            };
            let colour = class_colour(candidate.class_id);
            self.draw_box(&mut canvas, rect, colour);
            if let Some(font) = &self.font {
                let text = format!("{} {:.2}", candidate.label, candidate.confidence);
                draw_label(&mut canvas, font, rect, colour, &text);
            }
            drawn += 1;
        }
        let (width, height) = canvas.dimensions();
        Ok(AnnotatedFrame::new(
            Frame::from_rgb(canvas.into_raw(), width, height),
            drawn,
        ))
    }

    fn draw_box(&self, canvas: &mut RgbImage, rect: Rect, colour: Rgb<u8>) {
        for inset in 0..self.thickness {
            let w = rect.width().saturating_sub(2 * inset);
            let h = rect.height().saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let ring = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, ring, colour);
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_THICKNESS)
    }
}

fn draw_label(canvas: &mut RgbImage, font: &FontVec, rect: Rect, colour: Rgb<u8>, text: &str) {
    let scale = PxScale::from(LABEL_HEIGHT_PX);
    let (text_w, text_h) = text_size(scale, font, text);
    let bar_h = text_h + 4;
    // Above the box when there is room, otherwise just inside its top edge.
    let top = if rect.top() >= bar_h as i32 {
        rect.top() - bar_h as i32
    } else {
        rect.top()
    };
    let bar = Rect::at(rect.left(), top).of_size(text_w + 4, bar_h);
    draw_filled_rect_mut(canvas, bar, colour);
    draw_text_mut(canvas, TEXT_COLOUR, rect.left() + 2, top + 2, scale, font, text);
}

fn clamp_rect(candidate: &BoxCandidate, width: u32, height: u32) -> Option<Rect> {
    if !(candidate.x.is_finite()
        && candidate.y.is_finite()
        && candidate.w.is_finite()
        && candidate.h.is_finite())
    {
        return None;
    }
    let x0 = candidate.x.round().clamp(0.0, width as f32) as u32;
    let y0 = candidate.y.round().clamp(0.0, height as f32) as u32;
    let x1 = (candidate.x + candidate.w).round().clamp(0.0, width as f32) as u32;
    let y1 = (candidate.y + candidate.h).round().clamp(0.0, height as f32) as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0, y1 - y0))
}
