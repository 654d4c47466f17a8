use anyhow::Result;

use crate::detect::result::RawDetection;

/// Confidence threshold applied when the caller does not configure one.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Detector backend trait.
///
/// A backend wraps one object-detection model. It receives a packed RGB frame
/// and returns pixel-space boxes for every instance at or above the threshold.
/// The pixel slice is read-only and must not be retained past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB24 frame of `width * height * 3` bytes.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once when the backend is loaded.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Check that `pixels` holds exactly one RGB24 frame of the given size.
pub(crate) fn check_rgb_len(pixels: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow::anyhow!(
            "expected {} RGB bytes, received {}",
            expected,
            pixels.len()
        ));
    }
    Ok(())
}
