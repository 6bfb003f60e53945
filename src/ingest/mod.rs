//! Upload acquisition.
//!
//! - `Upload`: the uploaded blob plus its client-side file name.
//! - `MediaKind`: image or video mode, chosen from the file extension.
//! - `normalize`: decoder output to RGB `Frame`.
//! - `FrameSource`: scoped temp file + lazy frame decoding for videos.
//!
//! Accepted image types: jpg, jpeg, png.
//! Accepted video types: mp4, avi, mov, mkv (feature: decode-ffmpeg), gif.
//! No size limit is enforced here; deployment surfaces may add one.

#[cfg(feature = "decode-ffmpeg")]
pub(crate) mod video_ffmpeg;
mod video_gif;
mod normalize;
pub mod video;

pub use normalize::{decode_image, normalize};
pub use video::{FrameSource, SourceStats};

use std::path::Path;

use crate::error::{AnalysisError, AnalysisResult};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "gif"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// An uploaded file.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read an upload from a local path.
    pub fn from_path(path: &Path) -> AnalysisResult<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { file_name, bytes })
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.file_name)
    }

    pub fn kind(&self) -> AnalysisResult<MediaKind> {
        media_kind(&self.file_name)
    }
}

/// Route a file name to image or video mode.
pub fn media_kind(file_name: &str) -> AnalysisResult<MediaKind> {
    let Some(ext) = extension_of(file_name) else {
        return Err(AnalysisError::UnsupportedFormat(format!(
            "'{file_name}' has no file extension"
        )));
    };
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Ok(MediaKind::Video)
    } else {
        Err(AnalysisError::UnsupportedFormat(format!(
            "'.{ext}' uploads are not accepted"
        )))
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}
