//! pothole_service - HTTP pothole analysis service
//!
//! This daemon:
//! 1. Loads configuration from `POTHOLE_CONFIG` and the environment
//! 2. Loads the detection model (exits if it cannot)
//! 3. Serves `/health`, `/analyze` and `/test` until Ctrl-C
//!
//! The ONNX detector needs `--features backend-tract`. Without it the
//! default backend is `stub`, which reports no potholes for every image.

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use pothole_severity::{
    api::{ApiConfig, ApiServer},
    config::ServiceConfig,
    Analyzer, ModelHandle,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    log::info!(
        "starting pothole_service {} (backend '{}', model {})",
        env!("CARGO_PKG_VERSION"),
        config.detector.backend,
        config.detector.model_path.display()
    );

    let model = Arc::new(ModelHandle::new());
    if let Err(err) = config.detector.load_into(&model) {
        log::error!("failed to load detection model: {:#}", err);
        log::error!(
            "expected model at: {}",
            config.detector.model_path.display()
        );
        return Err(err);
    }

    let analyzer = Analyzer::new(model.clone()).with_threshold(config.detector.confidence_threshold);
    log::info!(
        "detector '{}' ready (confidence threshold {})",
        model.backend_name().unwrap_or("none"),
        analyzer.confidence_threshold()
    );
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_body_bytes: config.max_body_bytes,
        model_path: Some(config.detector.model_path.clone()),
    };
    let api_handle = ApiServer::new(api_config, analyzer).spawn()?;
    log::info!("analysis api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("pothole_service waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    model.unload()?;

    Ok(())
}
