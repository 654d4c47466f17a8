//! Transport image decoding.
//!
//! Clients send images as base64, optionally wrapped in a `data:` URL. The
//! decoded image is converted to packed RGB24 for the detector backends.

use base64::Engine;
use image::GenericImageView;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image bytes could not be decoded: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image has zero width or height")]
    ZeroSized,
}

/// Packed RGB24 frame.
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decode a base64 image string, with or without a `data:...;base64,` prefix.
pub fn decode_base64_image(encoded: &str) -> Result<DecodedImage, DecodeError> {
    let payload = match encoded.split_once(',') {
        Some((_, data)) => data,
        None => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.as_bytes())?;
    decode_image_bytes(&bytes)
}

/// Decode raw image file bytes (JPEG, PNG, WebP, BMP).
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized);
    }
    let rgb = image.into_rgb8();
    Ok(DecodedImage {
        pixels: rgb.into_raw(),
        width,
        height,
    })
}

/// Encode an RGB image as a base64 PNG. Used by tests and the offline tool.
pub fn encode_png_base64(image: &image::RgbImage) -> anyhow::Result<String> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes.into_inner()))
}
