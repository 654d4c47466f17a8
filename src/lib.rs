//! Pothole detection and severity assessment.
//!
//! This crate implements the analysis service behind road-damage reports:
//! an encoded road-surface image goes in, pothole detections and a severity
//! verdict come out.
//!
//! # Module Structure
//!
//! - `severity`: the scoring heuristic (detections + frame size -> verdict)
//! - `detect`: detector backends and the shared model handle
//! - `decode`: base64 / image-format decoding into RGB frames
//! - `analysis`: request orchestration and the report payload
//! - `api`: HTTP endpoints (`/health`, `/analyze`, `/test`)
//! - `config`: service configuration from file and environment

pub mod analysis;
pub mod api;
pub mod config;
pub mod decode;
pub mod detect;
pub mod severity;

pub use analysis::{AnalysisReport, AnalyzeError, Analyzer};
pub use decode::{DecodeError, DecodedImage};
pub use detect::{BoundingBox, Detection, DetectorBackend, ModelHandle, RawDetection, StubBackend};
pub use severity::{assess, AssessError, ImageDimensions, Severity, SeverityMetrics, SeverityVerdict};
