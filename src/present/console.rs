use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{Presenter, StatusLevel};
use crate::aggregate::RunSummary;
use crate::frame::{AnnotatedFrame, Frame};

const PLAIN_PROGRESS_EVERY: u64 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

/// Terminal presenter for the CLI.
///
/// Status and summary go to stderr/stdout; annotated frames are written as
/// PNG files into `out_dir` when one is configured. On a TTY progress is an
/// `indicatif` bar, otherwise plain lines.
pub struct ConsolePresenter {
    pretty: bool,
    out_dir: Option<PathBuf>,
    bar: Option<ProgressBar>,
    written: Vec<PathBuf>,
}

impl ConsolePresenter {
    pub fn new(mode: UiMode, is_tty: bool, out_dir: Option<PathBuf>) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            };
        Self {
            pretty,
            out_dir,
            bar: None,
            written: Vec::new(),
        }
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Time a named step; the returned guard reports on drop.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    fn line(&self, text: &str) {
        match &self.bar {
            Some(bar) => bar.println(text),
            None => eprintln!("{text}"),
        }
    }

    fn save(&mut self, file_name: &str, png: anyhow::Result<Vec<u8>>) {
        let Some(dir) = &self.out_dir else {
            return;
        };
        let path = dir.join(file_name);
        match png.and_then(|bytes| write_file(&path, &bytes)) {
            Ok(()) => self.written.push(path),
            Err(err) => log::warn!("could not write {}: {err:#}", path.display()),
        }
    }

    fn progress_bar(&mut self, estimated_total: Option<u64>) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let (bar, template) = match estimated_total {
                Some(total) => (
                    ProgressBar::new(total),
                    "{spinner} frames {pos}/{len} [{bar:30}] {elapsed_precise}",
                ),
                None => (
                    ProgressBar::new_spinner(),
                    "{spinner} frames {pos} {elapsed_precise}",
                ),
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar
        })
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Presenter for ConsolePresenter {
    fn show_original(&mut self, frame: &Frame) {
        self.line(&format!(
            "original image: {}x{}",
            frame.width(),
            frame.height()
        ));
        self.save("original.png", frame.encode_png());
    }

    fn show_annotated(&mut self, annotated: &AnnotatedFrame, caption: &str) {
        let file_name = match caption.strip_prefix("Frame ") {
            Some(index) => format!("frame_{index:0>5}.png"),
            None => "annotated.png".to_string(),
        };
        if self.bar.is_none() {
            self.line(&format!("{caption} ({} boxes)", annotated.boxes_drawn()));
        }
        self.save(&file_name, annotated.encode_png());
    }

    fn show_status(&mut self, level: StatusLevel, text: &str) {
        self.finish_bar();
        let tag = match level {
            StatusLevel::Success => "ok",
            StatusLevel::Info => "info",
            StatusLevel::Warning => "warn",
            StatusLevel::Error => "error",
        };
        eprintln!("[{tag}] {text}");
    }

    fn show_summary(&mut self, summary: &RunSummary) {
        self.finish_bar();
        println!("frames processed: {}", summary.frames_processed());
        println!("full:             {}", summary.full_count());
        println!("empty:            {}", summary.empty_count());
        println!("unclassified:     {}", summary.unclassified());
    }

    fn show_progress(&mut self, current: u64, estimated_total: Option<u64>) {
        if self.pretty {
            let bar = self.progress_bar(estimated_total);
            bar.set_position(current);
        } else if current % PLAIN_PROGRESS_EVERY == 0 {
            match estimated_total {
                Some(total) => eprintln!("frames {current}/{total}"),
                None => eprintln!("frames {current}"),
            }
        }
    }
}

impl Drop for ConsolePresenter {
    fn drop(&mut self) {
        self.finish_bar();
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
