//! Animated GIF frame source, decoded in-process by `image`.
//!
//! The logical screen size comes from the file header, and the decoder
//! allocates a full-canvas buffer per frame from it, so both the dimensions
//! and the total allocation are capped before any frame is read.

use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Frames, ImageDecoder, Limits};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::frame::RawImage;

pub(crate) const MAX_GIF_DIMENSION: u32 = 4096;
pub(crate) const MAX_GIF_ALLOC_BYTES: u64 = 256 * 1024 * 1024;

pub(crate) struct GifVideo {
    frames: Frames<'static>,
    // First frame, decoded during `open`.
    pending: Option<RawImage>,
}

fn decoder_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_GIF_DIMENSION);
    limits.max_image_height = Some(MAX_GIF_DIMENSION);
    limits.max_alloc = Some(MAX_GIF_ALLOC_BYTES);
    limits
}

impl GifVideo {
    /// Parse the container and decode its first frame.
    ///
    /// A header over the size limits, or a first frame that cannot be
    /// decoded, is an open failure rather than a mid-stream one.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut decoder = GifDecoder::new(BufReader::new(file)).context("parse gif container")?;
        let (width, height) = decoder.dimensions();
        decoder
            .set_limits(decoder_limits())
            .with_context(|| format!("gif canvas {width}x{height} exceeds decoder limits"))?;

        let mut frames = decoder.into_frames();
        let pending = match frames.next() {
            Some(first) => Some(to_raw(first.context("decode first gif frame")?)),
            None => None,
        };
        Ok(Self { frames, pending })
    }

    pub(crate) fn next_raw(&mut self) -> Result<Option<RawImage>> {
        if let Some(first) = self.pending.take() {
            return Ok(Some(first));
        }
        let Some(frame) = self.frames.next() else {
            return Ok(None);
        };
        Ok(Some(to_raw(frame.context("decode gif frame")?)))
    }
}

fn to_raw(frame: image::Frame) -> RawImage {
    let buffer = frame.into_buffer();
    let (width, height) = buffer.dimensions();
    RawImage::rgba(buffer.into_raw(), width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn oversized_logical_screen_is_refused_at_open() {
        // Header + 65535x65535 logical screen, no colour table, trailer.
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x3B]);
        let file = write_temp(&bytes);
        assert!(GifVideo::open(file.path()).is_err());
    }

    #[test]
    fn garbage_after_header_is_refused_at_open() {
        let file = write_temp(b"GIF89a but not really");
        assert!(GifVideo::open(file.path()).is_err());
    }
}
