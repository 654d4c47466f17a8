//! Request orchestration: decode, detect, assess, report.

use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::decode::{decode_base64_image, DecodeError, DecodedImage};
use crate::detect::{Detection, ModelHandle, RawDetection, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::severity::{assess, AssessError, ImageDimensions, Severity, SeverityMetrics};

const CATEGORY_ROADS: &str = "Roads";
const CATEGORY_OTHER: &str = "Other";

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("detection model is not loaded")]
    ModelUnavailable,
    #[error("detection failed: {0:#}")]
    Detection(anyhow::Error),
    #[error(transparent)]
    Assessment(#[from] AssessError),
}

/// Response payload for one analyzed image.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub success: bool,
    pub detected: bool,
    pub detection_type: &'static str,
    pub detection_count: usize,
    pub detections: Vec<Detection>,
    pub suggested_category: &'static str,
    pub suggested_severity: Severity,
    pub severity_score: u32,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SeverityMetrics>,
    pub image_size: ImageDimensions,
    pub processed_at: DateTime<Local>,
}

/// Runs the full analysis pipeline against an injected model handle.
#[derive(Clone)]
pub struct Analyzer {
    model: Arc<ModelHandle>,
    confidence_threshold: f32,
}

impl Analyzer {
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self {
            model,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Analyze a base64 (or data URL) encoded image.
    pub fn analyze(&self, encoded_image: &str) -> Result<AnalysisReport, AnalyzeError> {
        let image = decode_base64_image(encoded_image)?;
        self.analyze_decoded(&image)
    }

    /// Analyze an already decoded RGB frame.
    pub fn analyze_decoded(&self, image: &DecodedImage) -> Result<AnalysisReport, AnalyzeError> {
        let dims = ImageDimensions::new(image.width, image.height)?;
        let raw = self
            .model
            .detect(
                &image.pixels,
                image.width,
                image.height,
                self.confidence_threshold,
            )
            .map_err(AnalyzeError::Detection)?
            .ok_or(AnalyzeError::ModelUnavailable)?;
        log::debug!(
            "detector returned {} boxes for {}x{} frame",
            raw.len(),
            dims.width,
            dims.height
        );

        let detections = sanitize(raw);
        let verdict = assess(&detections, dims.width, dims.height)?;
        let detected = !detections.is_empty();

        Ok(AnalysisReport {
            success: true,
            detected,
            detection_type: if detected { "pothole" } else { "none" },
            detection_count: detections.len(),
            suggested_category: if detected {
                CATEGORY_ROADS
            } else {
                CATEGORY_OTHER
            },
            suggested_severity: verdict.severity(),
            severity_score: verdict.severity_score(),
            reasoning: verdict.reasoning(),
            metrics: verdict.metrics().cloned(),
            detections,
            image_size: dims,
            processed_at: Local::now(),
        })
    }
}

/// Validate raw detections, dropping the ones the assessor would reject.
fn sanitize(raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter()
        .filter_map(|r| match Detection::try_from(r) {
            Ok(det) => Some(det),
            Err(err) => {
                log::warn!("dropping detection: {}", err);
                None
            }
        })
        .collect()
}
