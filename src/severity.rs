//! Severity assessment.
//!
//! Converts a set of validated pothole detections plus the analyzed frame size
//! into a [`SeverityVerdict`]: an ordered label, the integer score behind it,
//! the reasoning clauses that produced the score, and summary metrics.
//!
//! Four factors contribute to the score, always evaluated in this order:
//! area coverage, detection count, peak confidence, largest individual pothole.
//! Each factor takes the first band whose threshold it exceeds, highest
//! threshold first, so a value sitting exactly on a boundary lands in the
//! lower band.
//!
//! # Rounding
//!
//! Percentages are computed in `f64` before any rounding. All rounding is
//! half away from zero (`f64::round`): one decimal for area figures in
//! reasoning clauses, whole percent for confidence in clauses, two decimals
//! for the percentage and confidence reported in [`SeverityMetrics`].
//! Rounding affects display only; band selection uses the unrounded values.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::detect::Detection;

const NO_DAMAGE_REASONING: &str = "No significant damage detected";
const NO_DAMAGE_SCORE: u32 = 1;
const HIGH_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssessError {
    #[error("invalid image dimensions {width}x{height}: both must be positive")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid detection: {0}")]
    InvalidDetection(String),
}

/// Frame size the detections were computed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, AssessError> {
        if width == 0 || height == 0 {
            return Err(AssessError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn total_area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Ordered severity label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 8 => Severity::Critical,
            s if s >= 5 => Severity::High,
            s if s >= 3 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityMetrics {
    /// Summed pothole area in pixels.
    pub total_area: f64,
    pub area_percentage: f64,
    pub max_confidence: f64,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityVerdict {
    severity: Severity,
    severity_score: u32,
    #[serde(serialize_with = "join_clauses")]
    reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<SeverityMetrics>,
}

impl SeverityVerdict {
    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn severity_score(&self) -> u32 {
        self.severity_score
    }

    /// Reasoning clauses in evaluation order.
    pub fn clauses(&self) -> &[String] {
        &self.reasoning
    }

    pub fn reasoning(&self) -> String {
        self.reasoning.join("; ")
    }

    pub fn metrics(&self) -> Option<&SeverityMetrics> {
        self.metrics.as_ref()
    }
}

fn join_clauses<S: Serializer>(clauses: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&clauses.join("; "))
}

/// Assess the severity of a set of detections on an image of the given size.
///
/// An empty detection set is the no-damage verdict, not an error. The only
/// failure is a zero width or height.
pub fn assess(
    detections: &[Detection],
    image_width: u32,
    image_height: u32,
) -> Result<SeverityVerdict, AssessError> {
    let dims = ImageDimensions::new(image_width, image_height)?;

    if detections.is_empty() {
        return Ok(SeverityVerdict {
            severity: Severity::Low,
            severity_score: NO_DAMAGE_SCORE,
            reasoning: vec![NO_DAMAGE_REASONING.to_string()],
            metrics: None,
        });
    }

    let total_area = dims.total_area();
    let count = detections.len();
    let max_confidence = detections
        .iter()
        .map(Detection::confidence)
        .fold(f32::NEG_INFINITY, f32::max);
    let total_pothole_area: f64 = detections.iter().map(Detection::area).sum();
    let area_percentage = 100.0 * total_pothole_area / total_area;

    // First occurrence wins ties.
    let mut largest_area = detections[0].area();
    for det in &detections[1..] {
        if det.area() > largest_area {
            largest_area = det.area();
        }
    }
    let max_area_percentage = 100.0 * largest_area / total_area;

    let mut score = 0;
    let mut reasoning = Vec::with_capacity(4);

    let (delta, clause) = area_coverage_factor(area_percentage);
    score += delta;
    reasoning.push(clause);

    if let Some((delta, clause)) = count_factor(count) {
        score += delta;
        reasoning.push(clause);
    }

    if let Some((delta, clause)) = confidence_factor(max_confidence) {
        score += delta;
        reasoning.push(clause);
    }

    if let Some((delta, clause)) = largest_item_factor(max_area_percentage) {
        score += delta;
        reasoning.push(clause);
    }

    Ok(SeverityVerdict {
        severity: Severity::from_score(score),
        severity_score: score,
        reasoning,
        metrics: Some(SeverityMetrics {
            total_area: total_pothole_area,
            area_percentage: round_to(area_percentage, 2),
            max_confidence: round_to(max_confidence as f64, 2),
            count,
        }),
    })
}

fn area_coverage_factor(pct: f64) -> (u32, String) {
    let shown = round_to(pct, 1);
    if pct > 15.0 {
        (4, format!("Large area coverage ({:.1}%)", shown))
    } else if pct > 8.0 {
        (3, format!("Moderate area coverage ({:.1}%)", shown))
    } else if pct > 3.0 {
        (2, format!("Small area coverage ({:.1}%)", shown))
    } else {
        (1, format!("Minimal area coverage ({:.1}%)", shown))
    }
}

fn count_factor(count: usize) -> Option<(u32, String)> {
    if count >= 5 {
        Some((3, format!("Multiple potholes detected ({})", count)))
    } else if count >= 3 {
        Some((2, format!("Several potholes detected ({})", count)))
    } else if count == 2 {
        Some((1, "Two potholes detected".to_string()))
    } else {
        None
    }
}

fn confidence_factor(max_confidence: f32) -> Option<(u32, String)> {
    if max_confidence > HIGH_CONFIDENCE {
        let pct = round_to(max_confidence as f64 * 100.0, 0);
        Some((1, format!("High confidence detection ({:.0}%)", pct)))
    } else {
        None
    }
}

fn largest_item_factor(pct: f64) -> Option<(u32, String)> {
    let shown = round_to(pct, 1);
    if pct > 10.0 {
        Some((2, format!("Very large individual pothole ({:.1}%)", shown)))
    } else if pct > 5.0 {
        Some((1, format!("Large individual pothole ({:.1}%)", shown)))
    } else {
        None
    }
}

/// Round half away from zero to `places` decimals.
fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), confidence, 0).unwrap()
    }

    /// A `w x h` box shifted right by `index` pixels.
    fn sized(index: usize, w: f32, h: f32, confidence: f32) -> Detection {
        let x = index as f32 * 1.0;
        det(x, 0.0, x + w, h, confidence)
    }

    #[test]
    fn empty_detections_yield_fixed_low_verdict() {
        for (w, h) in [(1, 1), (640, 480), (4000, 3000)] {
            let verdict = assess(&[], w, h).unwrap();
            assert_eq!(verdict.severity(), Severity::Low);
            assert_eq!(verdict.severity_score(), 1);
            assert_eq!(verdict.reasoning(), "No significant damage detected");
            assert!(verdict.metrics().is_none());
        }
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let d = [det(0.0, 0.0, 10.0, 10.0, 0.5)];
        assert_eq!(
            assess(&d, 0, 100),
            Err(AssessError::InvalidDimensions {
                width: 0,
                height: 100
            })
        );
        assert!(matches!(
            assess(&[], 100, 0),
            Err(AssessError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn single_small_confident_pothole_is_low() {
        let verdict = assess(&[det(0.0, 0.0, 100.0, 100.0, 0.9)], 1000, 1000).unwrap();
        assert_eq!(verdict.severity_score(), 2);
        assert_eq!(verdict.severity(), Severity::Low);
        assert_eq!(
            verdict.reasoning(),
            "Minimal area coverage (1.0%); High confidence detection (90%)"
        );
        let metrics = verdict.metrics().unwrap();
        assert_eq!(metrics.total_area, 10_000.0);
        assert_eq!(metrics.area_percentage, 1.0);
        assert_eq!(metrics.max_confidence, 0.9);
        assert_eq!(metrics.count, 1);
    }

    #[test]
    fn five_medium_potholes_are_high() {
        let detections: Vec<Detection> = (0..5)
            .map(|i| {
                let confidence = if i == 2 { 0.85 } else { 0.6 };
                sized(i, 200.0, 100.0, confidence)
            })
            .collect();
        let verdict = assess(&detections, 1000, 1000).unwrap();
        assert_eq!(verdict.severity_score(), 7);
        assert_eq!(verdict.severity(), Severity::High);
        assert_eq!(
            verdict.clauses(),
            &[
                "Moderate area coverage (10.0%)".to_string(),
                "Multiple potholes detected (5)".to_string(),
                "High confidence detection (85%)".to_string(),
            ]
        );
        let metrics = verdict.metrics().unwrap();
        assert_eq!(metrics.total_area, 100_000.0);
        assert_eq!(metrics.area_percentage, 10.0);
        assert_eq!(metrics.max_confidence, 0.85);
        assert_eq!(metrics.count, 5);
    }

    #[test]
    fn single_moderate_pothole_without_confidence_is_low() {
        let verdict = assess(&[det(0.0, 0.0, 200.0, 200.0, 0.5)], 1000, 1000).unwrap();
        assert_eq!(verdict.severity_score(), 2);
        assert_eq!(verdict.severity(), Severity::Low);
        assert_eq!(verdict.reasoning(), "Small area coverage (4.0%)");
    }

    #[test]
    fn area_boundaries_fall_into_lower_band() {
        // 1000x1000 frame: 150000 px is exactly 15%, and so on.
        let cases = [
            (150_000.0, 3, "Moderate"),
            (150_001.0, 4, "Large"),
            (80_000.0, 2, "Small"),
            (80_001.0, 3, "Moderate"),
            (30_000.0, 1, "Minimal"),
            (30_001.0, 2, "Small"),
        ];
        for (area, expected_delta, label) in cases {
            let (delta, clause) = area_coverage_factor(100.0 * area / 1_000_000.0);
            assert_eq!(delta, expected_delta, "area {}", area);
            assert!(clause.starts_with(label), "{} vs {}", clause, label);
        }
    }

    #[test]
    fn count_boundaries() {
        assert_eq!(count_factor(5).map(|(d, _)| d), Some(3));
        assert_eq!(count_factor(4).map(|(d, _)| d), Some(2));
        assert_eq!(count_factor(3).map(|(d, _)| d), Some(2));
        assert_eq!(
            count_factor(2),
            Some((1, "Two potholes detected".to_string()))
        );
        assert_eq!(count_factor(1), None);
    }

    #[test]
    fn confidence_boundary_is_strict() {
        assert_eq!(confidence_factor(0.8), None);
        assert_eq!(
            confidence_factor(0.81),
            Some((1, "High confidence detection (81%)".to_string()))
        );
    }

    #[test]
    fn largest_item_boundaries() {
        // 1000x1000 frame: a 500x200 box is exactly 10%, 250x200 exactly 5%.
        let at_ten = assess(&[det(0.0, 0.0, 500.0, 200.0, 0.5)], 1000, 1000).unwrap();
        assert!(at_ten
            .clauses()
            .contains(&"Large individual pothole (10.0%)".to_string()));

        let at_five = assess(&[det(0.0, 0.0, 250.0, 200.0, 0.5)], 1000, 1000).unwrap();
        assert_eq!(at_five.clauses().len(), 1);

        assert_eq!(largest_item_factor(10.01).map(|(d, _)| d), Some(2));
        assert_eq!(largest_item_factor(5.01).map(|(d, _)| d), Some(1));
        assert_eq!(largest_item_factor(5.0), None);
    }

    #[test]
    fn score_maps_to_label() {
        for score in 0..=2 {
            assert_eq!(Severity::from_score(score), Severity::Low);
        }
        for score in 3..=4 {
            assert_eq!(Severity::from_score(score), Severity::Medium);
        }
        for score in 5..=7 {
            assert_eq!(Severity::from_score(score), Severity::High);
        }
        for score in [8, 9, 10, 42] {
            assert_eq!(Severity::from_score(score), Severity::Critical);
        }
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn maximum_score_is_critical() {
        let mut detections: Vec<Detection> =
            (0..4).map(|i| sized(i, 10.0, 10.0, 0.5)).collect();
        detections.push(det(0.0, 0.0, 600.0, 300.0, 0.95));
        let verdict = assess(&detections, 1000, 1000).unwrap();
        assert_eq!(verdict.severity_score(), 10);
        assert_eq!(verdict.severity(), Severity::Critical);
        assert_eq!(
            verdict.reasoning(),
            "Large area coverage (18.0%); Multiple potholes detected (5); \
             High confidence detection (95%); Very large individual pothole (18.0%)"
        );
    }

    #[test]
    fn growing_a_detection_never_lowers_the_score() {
        let others = [det(0.0, 0.0, 50.0, 50.0, 0.6), det(0.0, 0.0, 120.0, 80.0, 0.7)];
        let mut previous = 0;
        for side in (10..=600).step_by(10) {
            let mut detections = others.to_vec();
            detections.push(det(0.0, 0.0, side as f32, side as f32, 0.5));
            let score = assess(&detections, 1000, 1000).unwrap().severity_score();
            assert!(score >= previous, "side {} dropped score to {}", side, score);
            previous = score;
        }
    }

    #[test]
    fn metrics_count_matches_input() {
        for n in 1..8 {
            let detections: Vec<Detection> = (0..n).map(|i| sized(i, 5.0, 5.0, 0.3)).collect();
            let verdict = assess(&detections, 640, 480).unwrap();
            assert_eq!(verdict.metrics().unwrap().count, n);
        }
    }

    #[test]
    fn two_potholes_clause_has_no_count() {
        let detections = [det(0.0, 0.0, 10.0, 10.0, 0.4), det(20.0, 0.0, 30.0, 10.0, 0.4)];
        let verdict = assess(&detections, 1000, 1000).unwrap();
        assert_eq!(
            verdict.reasoning(),
            "Minimal area coverage (0.0%); Two potholes detected"
        );
        assert_eq!(verdict.severity_score(), 2);
    }

    #[test]
    fn metrics_are_rounded_to_two_decimals() {
        // 333 / 640*480 = 0.108398...%
        let verdict = assess(&[det(0.0, 0.0, 333.0, 1.0, 0.876)], 640, 480).unwrap();
        let metrics = verdict.metrics().unwrap();
        assert_eq!(metrics.area_percentage, 0.11);
        assert_eq!(metrics.max_confidence, 0.88);
        assert_eq!(metrics.total_area, 333.0);
    }

    #[test]
    fn serializes_reasoning_as_joined_string() {
        let verdict = assess(&[det(0.0, 0.0, 100.0, 100.0, 0.9)], 1000, 1000).unwrap();
        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(value["severity"], "Low");
        assert_eq!(value["severityScore"], 2);
        assert_eq!(
            value["reasoning"],
            "Minimal area coverage (1.0%); High confidence detection (90%)"
        );
        assert_eq!(value["metrics"]["count"], 1);

        let empty = serde_json::to_value(assess(&[], 10, 10).unwrap()).unwrap();
        assert!(empty.get("metrics").is_none());
    }
}
