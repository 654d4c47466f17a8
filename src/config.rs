use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{ModelHandle, StubBackend, DEFAULT_CONFIDENCE_THRESHOLD};

const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
#[cfg(feature = "backend-tract")]
const DEFAULT_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_DETECTIONS: usize = 300;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const KNOWN_BACKENDS: &[&str] = &["tract", "stub"];

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub max_detections: usize,
}

impl ServiceConfig {
    /// Load from the file named by `POTHOLE_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                max_detections: detector.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("POTHOLE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("POTHOLE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("POTHOLE_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("POTHOLE_CONFIDENCE_THRESHOLD") {
            self.detector.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("POTHOLE_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Ok(limit) = std::env::var("POTHOLE_MAX_BODY_BYTES") {
            self.max_body_bytes = limit
                .trim()
                .parse()
                .map_err(|_| anyhow!("POTHOLE_MAX_BODY_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of: {})",
                self.detector.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("input_size must be greater than zero"));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        Ok(())
    }
}

impl DetectorSettings {
    /// Construct the configured backend and load it into `model`.
    pub fn load_into(&self, model: &ModelHandle) -> Result<()> {
        match self.backend.as_str() {
            "stub" => {
                log::warn!("using stub detector backend; every image reports no potholes");
                model.load(StubBackend::new())
            }
            "tract" => self.load_tract(model),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn load_tract(&self, model: &ModelHandle) -> Result<()> {
        use crate::detect::{TractBackend, YoloParams};

        let params = YoloParams {
            input_size: self.input_size,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        };
        model.load(TractBackend::new(&self.model_path, params)?)
    }

    #[cfg(not(feature = "backend-tract"))]
    fn load_tract(&self, _model: &ModelHandle) -> Result<()> {
        Err(anyhow!(
            "tract backend not compiled in; rebuild with --features backend-tract \
             or set POTHOLE_DETECTOR_BACKEND=stub"
        ))
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
