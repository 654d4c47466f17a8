use anyhow::Result;

use crate::detect::backend::{check_rgb_len, DetectorBackend};
use crate::detect::result::RawDetection;

/// Stub backend for testing and model-less deployments.
///
/// Returns a fixed set of detections for every frame, filtered by the
/// requested confidence threshold and clipped to the frame.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<RawDetection>,
    calls: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            calls: 0,
        }
    }

    /// Number of frames processed so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        check_rgb_len(pixels, width, height)?;
        self.calls += 1;
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .map(|d| RawDetection {
                bounding_box: d.bounding_box.clamp_to(width, height),
                ..*d
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn raw(x2: f32, confidence: f32) -> RawDetection {
        RawDetection {
            bounding_box: BoundingBox::new(0.0, 0.0, x2, 5.0),
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn stub_backend_filters_by_threshold() {
        let mut backend = StubBackend::with_detections(vec![raw(5.0, 0.9), raw(5.0, 0.1)]);
        let pixels = vec![0u8; 10 * 10 * 3];

        let found = backend.detect(&pixels, 10, 10, 0.25).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, 0.9);

        let all = backend.detect(&pixels, 10, 10, 0.0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn stub_backend_clips_to_frame() {
        let mut backend = StubBackend::with_detections(vec![raw(50.0, 0.9)]);
        let pixels = vec![0u8; 10 * 10 * 3];
        let found = backend.detect(&pixels, 10, 10, 0.25).unwrap();
        assert_eq!(found[0].bounding_box.x2, 10.0);
    }

    #[test]
    fn stub_backend_rejects_short_frame() {
        let mut backend = StubBackend::new();
        assert!(backend.detect(&[0u8; 10], 10, 10, 0.25).is_err());
        assert_eq!(backend.calls(), 0);
    }
}
