//! Pixel containers.
//!
//! - `RawImage`: decoder output, 3 or 4 interleaved channels in either order.
//! - `Frame`: normalized RGB pixels, origin top-left. Immutable once built.
//! - `AnnotatedFrame`: a frame with detection boxes burned into its pixels.
//!
//! Neither `Frame` nor `AnnotatedFrame` exposes a mutable view of its pixels.
//! Annotation always produces a new buffer.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// Interleaved channel order of a decoded image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    /// OpenCV/FFmpeg BGR24 convention.
    Bgr,
}

/// Decoder output before normalization.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub order: ChannelOrder,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, order: ChannelOrder) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            order,
        }
    }

    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, 3, ChannelOrder::Rgb)
    }

    pub fn rgba(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, 4, ChannelOrder::Rgb)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Normalized 3-channel RGB frame.
///
/// Pixels are private; there is no `as_mut`, no `DerefMut`. Built only by
/// `ingest::normalize` so every frame has passed channel validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Caller guarantees `data.len() == width * height * 3`.
    pub(crate) fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only RGB bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Owned copy as an `image` buffer, for drawing and encoding.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        encode_png(self.to_rgb_image()?)
    }
}

// ----------------------------------------------------------------------------
// AnnotatedFrame
// ----------------------------------------------------------------------------

/// A frame with boxes/labels rendered onto its pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotatedFrame {
    frame: Frame,
    boxes_drawn: usize,
}

impl AnnotatedFrame {
    pub(crate) fn new(frame: Frame, boxes_drawn: usize) -> Self {
        Self { frame, boxes_drawn }
    }

    /// The un-boxed rendering of a frame: the input pixels unchanged.
    pub fn unboxed(frame: &Frame) -> Self {
        Self::new(frame.clone(), 0)
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn boxes_drawn(&self) -> usize {
        self.boxes_drawn
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        self.frame.encode_png()
    }
}

fn encode_png(image: RgbImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("encode frame as png")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_lookup_is_row_major() {
        let data = vec![
            1, 2, 3, 4, 5, 6, //
            7, 8, 9, 10, 11, 12,
        ];
        let frame = Frame::from_rgb(data, 2, 2);
        assert_eq!(frame.pixel(0, 0), Some([1, 2, 3]));
        assert_eq!(frame.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(frame.pixel(0, 1), Some([7, 8, 9]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn unboxed_annotation_keeps_pixels() {
        let frame = Frame::from_rgb(vec![9u8; 12], 2, 2);
        let annotated = AnnotatedFrame::unboxed(&frame);
        assert_eq!(annotated.frame(), &frame);
        assert_eq!(annotated.boxes_drawn(), 0);
    }

    #[test]
    fn png_encoding_produces_signature() {
        let frame = Frame::from_rgb(vec![0u8; 3 * 4 * 4], 4, 4);
        let png = frame.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
