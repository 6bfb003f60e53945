use image::DynamicImage;

use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::{ChannelOrder, Frame, RawImage};

/// Normalize a decoded image into an RGB `Frame`.
///
/// Four-channel input loses its alpha channel, keeping the first three.
/// BGR input is swapped to RGB. Any other channel count is rejected.
pub fn normalize(raw: RawImage) -> AnalysisResult<Frame> {
    let channels = raw.channels as usize;
    if channels != 3 && channels != 4 {
        return Err(AnalysisError::UnsupportedFormat(format!(
            "expected 3 or 4 channels, got {}",
            raw.channels
        )));
    }

    let pixel_count = (raw.width as usize)
        .checked_mul(raw.height as usize)
        .ok_or_else(|| AnalysisError::UnsupportedFormat("frame dimensions overflow".into()))?;
    let expected = pixel_count
        .checked_mul(channels)
        .ok_or_else(|| AnalysisError::UnsupportedFormat("frame dimensions overflow".into()))?;
    if raw.data.len() != expected {
        return Err(AnalysisError::UnsupportedFormat(format!(
            "frame length mismatch: expected {}, got {}",
            expected,
            raw.data.len()
        )));
    }

    let mut rgb = if channels == 3 {
        raw.data
    } else {
        let mut out = Vec::with_capacity(pixel_count * 3);
        for px in raw.data.chunks_exact(4) {
            out.extend_from_slice(&px[..3]);
        }
        out
    };

    if raw.order == ChannelOrder::Bgr {
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }

    Ok(Frame::from_rgb(rgb, raw.width, raw.height))
}

/// Decode an uploaded still image (jpg/png) and normalize it.
pub fn decode_image(bytes: &[u8]) -> AnalysisResult<Frame> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::UnsupportedFormat(format!("cannot decode image: {e}")))?;
    normalize(raw_from_dynamic(decoded))
}

/// Map the decoder's native layout onto a `RawImage`.
///
/// Grey and high bit-depth images are widened to 8-bit RGB(A) first, the way
/// the upload surface always handed RGB to the model.
pub(crate) fn raw_from_dynamic(image: DynamicImage) -> RawImage {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageRgb8(buf) => RawImage::rgb(buf.into_raw(), width, height),
        DynamicImage::ImageRgba8(buf) => RawImage::rgba(buf.into_raw(), width, height),
        other if other.color().has_alpha() => {
            RawImage::rgba(other.to_rgba8().into_raw(), width, height)
        }
        other => RawImage::rgb(other.to_rgb8().into_raw(), width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn alpha_is_dropped_and_colour_preserved() {
        let data = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let frame = normalize(RawImage::rgba(data, 2, 1)).unwrap();
        assert_eq!(frame.pixels(), &[10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let raw = RawImage::new(vec![1, 2, 3, 4, 5, 6], 2, 1, 3, ChannelOrder::Bgr);
        let frame = normalize(raw).unwrap();
        assert_eq!(frame.pixels(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn bgra_drops_alpha_then_swaps() {
        let raw = RawImage::new(vec![1, 2, 3, 9], 1, 1, 4, ChannelOrder::Bgr);
        let frame = normalize(raw).unwrap();
        assert_eq!(frame.pixels(), &[3, 2, 1]);
    }

    #[test]
    fn other_channel_counts_are_rejected() {
        for channels in [0u8, 1, 2, 5] {
            let raw = RawImage::new(vec![0; 4 * channels as usize], 2, 2, channels, ChannelOrder::Rgb);
            let err = normalize(raw).unwrap_err();
            assert!(matches!(err, AnalysisError::UnsupportedFormat(_)));
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = normalize(RawImage::rgb(vec![0; 5], 1, 2)).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat(_)));
    }

    #[test]
    fn decodes_png_with_alpha() {
        let mut img = RgbaImage::new(2, 2);
        for px in img.pixels_mut() {
            *px = Rgba([200, 100, 50, 128]);
        }
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();

        let frame = decode_image(bytes.get_ref()).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.pixel(1, 1), Some([200, 100, 50]));
    }

    #[test]
    fn grey_images_widen_to_rgb() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 1, Luma([77])));
        let frame = normalize(raw_from_dynamic(img)).unwrap();
        assert_eq!(frame.pixels(), &[77, 77, 77]);
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat(_)));
    }
}
