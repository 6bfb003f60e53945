//! Video frame source.
//!
//! `FrameSource` owns the uploaded bytes persisted to a scoped temporary file
//! for the whole decode. The file is removed when the source is closed or
//! dropped, including when opening or decoding fails partway.
//!
//! Frames come out lazily in presentation order. The sequence is forward-only:
//! after exhaustion or a decode error `next_frame` keeps returning `Ok(None)`,
//! and a fresh `open` is the only way to decode again.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::normalize::normalize;
#[cfg(feature = "decode-ffmpeg")]
use super::video_ffmpeg::FfmpegVideo;
use super::video_gif::GifVideo;
use super::Upload;
use crate::error::{AnalysisError, AnalysisResult};
use crate::frame::{Frame, RawImage};

/// Lazy, finite, forward-only sequence of decoded frames.
pub struct FrameSource {
    // Declared before `scratch` so the decoder releases its handle first.
    backend: VideoBackend,
    scratch: NamedTempFile,
    file_name: String,
    frames_decoded: u64,
    finished: bool,
}

enum VideoBackend {
    Gif(GifVideo),
    #[cfg(feature = "decode-ffmpeg")]
    Ffmpeg(FfmpegVideo),
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_decoded: u64,
    pub estimated_total: Option<u64>,
    pub file_name: String,
    pub backend: &'static str,
}

impl FrameSource {
    /// Persist the upload into `scratch_dir` (or the system temp dir) and open
    /// a decoder on it.
    pub fn open(upload: &Upload, scratch_dir: Option<&Path>) -> AnalysisResult<Self> {
        let ext = upload.extension().unwrap_or_default();
        let scratch = persist_scratch(&upload.bytes, &ext, scratch_dir)?;
        log::debug!(
            "FrameSource: {} persisted to {} ({} bytes)",
            upload.file_name,
            scratch.path().display(),
            upload.bytes.len()
        );

        // On error `scratch` is dropped here and the temp file goes with it.
        let backend = open_backend(&ext, scratch.path())?;

        log::info!(
            "FrameSource: opened {} ({})",
            upload.file_name,
            backend.name()
        );
        Ok(Self {
            backend,
            scratch,
            file_name: upload.file_name.clone(),
            frames_decoded: 0,
            finished: false,
        })
    }

    /// Decode the next frame. `Ok(None)` once the source is exhausted.
    pub fn next_frame(&mut self) -> AnalysisResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let index = self.frames_decoded + 1;
        let raw = match self.backend.next_raw() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.finished = true;
                log::debug!(
                    "FrameSource: {} exhausted after {} frames",
                    self.file_name,
                    self.frames_decoded
                );
                return Ok(None);
            }
            Err(err) => {
                self.finished = true;
                return Err(AnalysisError::DecodeError {
                    frame: index,
                    reason: format!("{err:#}"),
                });
            }
        };
        let frame = normalize(raw).map_err(|err| {
            self.finished = true;
            AnalysisError::DecodeError {
                frame: index,
                reason: err.to_string(),
            }
        })?;
        self.frames_decoded = index;
        Ok(Some(frame))
    }

    /// Container-reported frame count, when the container has one.
    pub fn estimated_total(&self) -> Option<u64> {
        self.backend.estimated_total()
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_decoded: self.frames_decoded,
            estimated_total: self.estimated_total(),
            file_name: self.file_name.clone(),
            backend: self.backend.name(),
        }
    }

    /// Release the decoder and delete the scratch file.
    pub fn close(self) -> AnalysisResult<()> {
        let FrameSource {
            backend, scratch, ..
        } = self;
        drop(backend);
        let path: PathBuf = scratch.path().to_path_buf();
        scratch.close()?;
        log::debug!("FrameSource: removed {}", path.display());
        Ok(())
    }
}

impl Iterator for FrameSource {
    type Item = AnalysisResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

impl VideoBackend {
    fn name(&self) -> &'static str {
        match self {
            VideoBackend::Gif(_) => "gif",
            #[cfg(feature = "decode-ffmpeg")]
            VideoBackend::Ffmpeg(_) => "ffmpeg",
        }
    }

    fn next_raw(&mut self) -> anyhow::Result<Option<RawImage>> {
        match self {
            VideoBackend::Gif(source) => source.next_raw(),
            #[cfg(feature = "decode-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.next_raw(),
        }
    }

    fn estimated_total(&self) -> Option<u64> {
        match self {
            VideoBackend::Gif(_) => None,
            #[cfg(feature = "decode-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.estimated_total(),
        }
    }
}

fn persist_scratch(
    bytes: &[u8],
    ext: &str,
    scratch_dir: Option<&Path>,
) -> AnalysisResult<NamedTempFile> {
    let suffix = if ext.is_empty() {
        String::new()
    } else {
        format!(".{ext}")
    };
    let mut builder = tempfile::Builder::new();
    builder.prefix("binsight-").suffix(&suffix);
    let mut file = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

fn open_backend(ext: &str, path: &Path) -> AnalysisResult<VideoBackend> {
    match ext {
        "gif" => GifVideo::open(path)
            .map(VideoBackend::Gif)
            .map_err(|err| AnalysisError::CannotOpen(format!("{err:#}"))),
        #[cfg(feature = "decode-ffmpeg")]
        _ => FfmpegVideo::open(path)
            .map(VideoBackend::Ffmpeg)
            .map_err(|err| AnalysisError::CannotOpen(format!("{err:#}"))),
        #[cfg(not(feature = "decode-ffmpeg"))]
        other => Err(AnalysisError::CannotOpen(format!(
            "'.{other}' containers require the decode-ffmpeg feature"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba, RgbaImage};

    fn gif_bytes(count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let frames = (0..count).map(|i| {
                let shade = (i * 20) as u8;
                let img = RgbaImage::from_pixel(8, 6, Rgba([shade, shade, shade, 255]));
                image::Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(40, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        bytes
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn yields_every_frame_then_stays_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let upload = Upload::new("clip.gif", gif_bytes(4));
        let mut source = FrameSource::open(&upload, Some(dir.path())).unwrap();
        assert!(source.scratch_path().exists());

        let frames: Vec<Frame> = source.by_ref().collect::<AnalysisResult<_>>().unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].width(), 8);
        assert_eq!(frames[0].height(), 6);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_decoded, 4);

        source.close().unwrap();
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn scratch_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let upload = Upload::new("clip.gif", gif_bytes(2));
        let mut source = FrameSource::open(&upload, Some(dir.path())).unwrap();
        let _ = source.next_frame().unwrap();
        drop(source);
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn unparseable_container_cannot_open_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let upload = Upload::new("broken.gif", b"this is not a gif".to_vec());
        let err = FrameSource::open(&upload, Some(dir.path())).err().unwrap();
        assert!(matches!(err, AnalysisError::CannotOpen(_)));
        assert!(scratch_is_empty(dir.path()));
    }

    #[test]
    fn truncated_stream_fails_mid_decode_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = gif_bytes(6);
        bytes.truncate(bytes.len() - 4);
        let upload = Upload::new("cut.gif", bytes);

        let mut source = FrameSource::open(&upload, Some(dir.path())).unwrap();
        let mut saw_error = false;
        for item in source.by_ref() {
            if let Err(err) = item {
                assert!(matches!(err, AnalysisError::DecodeError { .. }));
                saw_error = true;
            }
        }
        assert!(saw_error);
        drop(source);
        assert!(scratch_is_empty(dir.path()));
    }
}
