//! binsight_api - HTTP service for bin fill-level analysis
//!
//! This daemon:
//! 1. Loads the model artifact (refuses to start without it)
//! 2. Serves health, model download and upload analysis endpoints
//! 3. Stops on Ctrl-C

use anyhow::{Context, Result};
use std::sync::mpsc;
use std::sync::Arc;

use binsight::api::{ApiConfig, ApiServer};
use binsight::{AppConfig, ModelService};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::load()?;
    let model = match ModelService::load(&cfg) {
        Ok(model) => Arc::new(model),
        Err(err) => {
            log::error!("{err}");
            log::error!(
                "place the model at {} or set BINSIGHT_MODEL_PATH",
                cfg.model.path.display()
            );
            return Err(err.into());
        }
    };

    let api_config = ApiConfig::from(&cfg.api);
    let api_handle = ApiServer::new(api_config, model, cfg.video.clone()).spawn()?;
    log::info!(
        "binsight_api running on http://{} (download name {})",
        api_handle.addr,
        cfg.model.download_name
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("binsight_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
