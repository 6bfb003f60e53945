use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_DOWNLOAD_NAME: &str = "best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8501";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_PREVIEW_EVERY: u64 = 1;
const DEFAULT_MAX_PREVIEW_FRAMES: u64 = 150;
const DEFAULT_LINE_THICKNESS: u32 = 2;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    model: Option<ModelConfigFile>,
    labels: Option<LabelConfigFile>,
    video: Option<VideoConfigFile>,
    api: Option<ApiConfigFile>,
    annotate: Option<AnnotateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    download_name: Option<String>,
    backend: Option<String>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct LabelConfigFile {
    full: Option<Vec<String>>,
    empty: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    scratch_dir: Option<PathBuf>,
    preview_every: Option<u64>,
    max_preview_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    font_path: Option<PathBuf>,
    line_thickness: Option<u32>,
}

/// Which detector backend runs the model artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Tract,
    Stub,
}

impl Default for BackendKind {
    /// `Tract` when compiled in, otherwise the stub.
    fn default() -> Self {
        if cfg!(feature = "backend-tract") {
            BackendKind::Tract
        } else {
            BackendKind::Stub
        }
    }
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tract => "tract",
            BackendKind::Stub => "stub",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(BackendKind::Tract),
            "stub" => Ok(BackendKind::Stub),
            other => Err(anyhow!("unknown backend '{other}' (expected tract or stub)")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub labels: LabelSettings,
    pub video: VideoSettings,
    pub api: ApiSettings,
    pub annotate: AnnotateSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub download_name: String,
    pub backend: BackendKind,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub class_names: Vec<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            download_name: DEFAULT_DOWNLOAD_NAME.to_string(),
            backend: BackendKind::default(),
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            class_names: vec!["pleine".to_string(), "vide".to_string()],
        }
    }
}

/// Label substrings for the full/empty classification.
#[derive(Debug, Clone)]
pub struct LabelSettings {
    pub full: Vec<String>,
    pub empty: Vec<String>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            full: vec!["full".to_string(), "pleine".to_string()],
            empty: vec!["empty".to_string(), "vide".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    /// Where uploaded videos are persisted while decoding. `None` = system temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Emit every n-th annotated frame as a preview.
    pub preview_every: u64,
    pub max_preview_frames: u64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            preview_every: DEFAULT_PREVIEW_EVERY,
            max_preview_frames: DEFAULT_MAX_PREVIEW_FRAMES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub max_upload_bytes: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotateSettings {
    pub font_path: Option<PathBuf>,
    pub line_thickness: u32,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        Self {
            font_path: None,
            line_thickness: DEFAULT_LINE_THICKNESS,
        }
    }
}

impl AppConfig {
    /// Defaults, then the file named by `BINSIGHT_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BINSIGHT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let defaults = AppConfig::default();

        let model_file = file.model.unwrap_or_default();
        let backend = match model_file.backend {
            Some(name) => name.parse()?,
            None => defaults.model.backend,
        };
        let model = ModelSettings {
            path: model_file.path.unwrap_or(defaults.model.path),
            download_name: model_file
                .download_name
                .unwrap_or(defaults.model.download_name),
            backend,
            input_size: model_file.input_size.unwrap_or(defaults.model.input_size),
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(defaults.model.confidence_threshold),
            iou_threshold: model_file
                .iou_threshold
                .unwrap_or(defaults.model.iou_threshold),
            class_names: model_file
                .class_names
                .unwrap_or(defaults.model.class_names),
        };

        let labels_file = file.labels.unwrap_or_default();
        let labels = LabelSettings {
            full: labels_file.full.unwrap_or(defaults.labels.full),
            empty: labels_file.empty.unwrap_or(defaults.labels.empty),
        };

        let video_file = file.video.unwrap_or_default();
        let video = VideoSettings {
            scratch_dir: video_file.scratch_dir.or(defaults.video.scratch_dir),
            preview_every: video_file
                .preview_every
                .unwrap_or(defaults.video.preview_every),
            max_preview_frames: video_file
                .max_preview_frames
                .unwrap_or(defaults.video.max_preview_frames),
        };

        let api_file = file.api.unwrap_or_default();
        let api = ApiSettings {
            addr: api_file.addr.unwrap_or(defaults.api.addr),
            max_upload_bytes: api_file
                .max_upload_bytes
                .unwrap_or(defaults.api.max_upload_bytes),
        };

        let annotate_file = file.annotate.unwrap_or_default();
        let annotate = AnnotateSettings {
            font_path: annotate_file.font_path,
            line_thickness: annotate_file
                .line_thickness
                .unwrap_or(defaults.annotate.line_thickness),
        };

        Ok(Self {
            model,
            labels,
            video,
            api,
            annotate,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("BINSIGHT_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = env_nonempty("BINSIGHT_BACKEND") {
            self.model.backend = backend
                .parse()
                .context("BINSIGHT_BACKEND is invalid")?;
        }
        if let Some(addr) = env_nonempty("BINSIGHT_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(dir) = env_nonempty("BINSIGHT_SCRATCH_DIR") {
            self.video.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(font) = env_nonempty("BINSIGHT_FONT_PATH") {
            self.annotate.font_path = Some(PathBuf::from(font));
        }
        if let Ok(words) = std::env::var("BINSIGHT_FULL_LABELS") {
            let parsed = split_csv(&words);
            if !parsed.is_empty() {
                self.labels.full = parsed;
            }
        }
        if let Ok(words) = std::env::var("BINSIGHT_EMPTY_LABELS") {
            let parsed = split_csv(&words);
            if !parsed.is_empty() {
                self.labels.empty = parsed;
            }
        }
        if let Some(limit) = env_nonempty("BINSIGHT_MAX_UPLOAD_BYTES") {
            self.api.max_upload_bytes = limit.trim().parse().map_err(|_| {
                anyhow!("BINSIGHT_MAX_UPLOAD_BYTES must be an integer number of bytes")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.model.confidence_threshold),
            ("iou_threshold", self.model.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("model.{name} must be within [0, 1], got {value}"));
            }
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model.input_size must be greater than zero"));
        }
        let download_name = self.model.download_name.trim();
        if download_name.is_empty()
            || download_name.contains(['/', '\\'])
            || download_name.contains('"')
        {
            return Err(anyhow!(
                "model.download_name must be a bare file name, got '{}'",
                self.model.download_name
            ));
        }
        self.model.download_name = download_name.to_string();

        self.labels.full = clean_words(&self.labels.full);
        self.labels.empty = clean_words(&self.labels.empty);
        if self.labels.full.is_empty() || self.labels.empty.is_empty() {
            return Err(anyhow!("labels.full and labels.empty must not be empty"));
        }

        if self.video.preview_every == 0 {
            return Err(anyhow!("video.preview_every must be at least 1"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("api.max_upload_bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: AppConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn clean_words(words: &[String]) -> Vec<String> {
    words
        .iter()
        .map(|word| word.trim().to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!("Tract".parse::<BackendKind>().unwrap(), BackendKind::Tract);
        assert_eq!("stub".parse::<BackendKind>().unwrap(), BackendKind::Stub);
        assert!("opencv".parse::<BackendKind>().is_err());
    }

    #[test]
    fn default_backend_is_one_that_is_compiled_in() {
        let backend = AppConfig::default().model.backend;
        assert_eq!(
            backend == BackendKind::Tract,
            cfg!(feature = "backend-tract")
        );
        assert_eq!(BackendKind::default().as_str(), backend.as_str());
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" full, ,pleine,"), vec!["full", "pleine"]);
    }

    #[test]
    fn defaults_validate() {
        let mut cfg = AppConfig::from_file(AppConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.model.path, PathBuf::from("best.onnx"));
        assert_eq!(cfg.video.max_preview_frames, 150);
        assert_eq!(cfg.api.max_upload_bytes, 200 * 1024 * 1024);
    }

    #[test]
    fn rejects_download_name_with_separators() {
        let mut cfg = AppConfig::default();
        cfg.model.download_name = "../best.onnx".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = AppConfig::default();
        cfg.model.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_preview_stride() {
        let mut cfg = AppConfig::default();
        cfg.video.preview_every = 0;
        assert!(cfg.validate().is_err());
    }
}
