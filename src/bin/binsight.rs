//! binsight - analyze one image or video for bin fill level
//!
//! Loads the model once, runs the upload through the pipeline and prints
//! status and summary. Annotated frames are written as PNG files when
//! `--out` is given. Ctrl-C stops a video run between frames.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use binsight::config::{AppConfig, BackendKind};
use binsight::present::{ConsolePresenter, UiMode};
use binsight::{AnalysisError, ModelService, Pipeline, Upload};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image (jpg, jpeg, png) or video (mp4, avi, mov, mkv, gif) to analyze.
    input: PathBuf,
    /// Directory for annotated PNG output.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Model artifact path (overrides config).
    #[arg(long, env = "BINSIGHT_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Detector backend: tract or stub (overrides config).
    #[arg(long, env = "BINSIGHT_BACKEND")]
    backend: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        log::error!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut cfg = AppConfig::load()?;
    if let Some(model) = args.model {
        cfg.model.path = model;
    }
    if let Some(backend) = args.backend.as_deref() {
        cfg.model.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("failed to create output dir {}", out.display()))?;
    }

    let is_tty = std::io::stderr().is_terminal();
    let mut presenter = ConsolePresenter::new(UiMode::from_flag(Some(args.ui.as_str())), is_tty, args.out);

    let model = {
        let _stage = presenter.stage("Load model");
        Arc::new(ModelService::load(&cfg)?)
    };

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let upload = Upload::from_path(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut pipeline = Pipeline::new(model, cfg.video.clone()).with_interrupt(interrupt);
    let report = pipeline.analyze(&upload, &mut presenter)?;
    log::debug!("report: {}", serde_json::to_string(&report)?);

    for path in presenter.written() {
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::ModelUnavailable(_)) => 3,
        Some(AnalysisError::UnsupportedFormat(_)) => 4,
        Some(AnalysisError::Interrupted { .. }) => 130,
        Some(_) => 1,
        None => 2,
    }
}
