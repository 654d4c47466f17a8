#![cfg(feature = "backend-tract")]

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{check_rgb_len, DetectorBackend};
use crate::detect::result::{BoundingBox, RawDetection};

/// Post-processing parameters for a YOLO-family detection head.
#[derive(Clone, Debug, PartialEq)]
pub struct YoloParams {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// Tract-based backend for YOLO ONNX exports.
///
/// Frames are resized to the square model input, the `[1, 4 + classes, anchors]`
/// head is decoded into pixel-space boxes, and overlapping boxes of the same
/// class are suppressed. Only the model file is read from disk.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    params: YoloParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, params: YoloParams) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = params.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, params })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        check_rgb_len(pixels, width, height)?;
        let frame = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
        let size = self.params.input_size;
        let resized = image::imageops::resize(&frame, size, size, FilterType::Triangle);

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let candidates = decode_head(
            view,
            self.params.input_size,
            width,
            height,
            confidence_threshold,
        )?;
        Ok(non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        ))
    }
}

/// Turn a `[1, 4 + classes, anchors]` (or `[1, anchors, 4 + classes]`) head
/// into frame-space candidates above `confidence_threshold`.
///
/// Each anchor holds `cx, cy, w, h` in model-input pixels followed by one
/// score per class; the best class wins.
fn decode_head(
    view: tract_ndarray::ArrayView3<f32>,
    input_size: u32,
    width: u32,
    height: u32,
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let shape = view.shape().to_vec();
    if shape[0] != 1 {
        return Err(anyhow!("unexpected model output shape {:?}", shape));
    }

    // Exports disagree on whether features or anchors come first.
    let features_first = shape[1] < shape[2];
    let (features, anchors) = if features_first {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if features < 5 {
        return Err(anyhow!("model output has {} features, need at least 5", features));
    }
    let at = |anchor: usize, feature: usize| -> f32 {
        if features_first {
            view[[0, feature, anchor]]
        } else {
            view[[0, anchor, feature]]
        }
    };

    let scale_x = width as f32 / input_size as f32;
    let scale_y = height as f32 / input_size as f32;
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (4..features)
            .map(|f| (f - 4, at(anchor, f)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if confidence.is_nan() || confidence < confidence_threshold {
            continue;
        }
        let cx = at(anchor, 0) * scale_x;
        let cy = at(anchor, 1) * scale_y;
        let w = at(anchor, 2) * scale_x;
        let h = at(anchor, 3) * scale_y;
        let bounding_box = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
            .clamp_to(width, height);
        candidates.push(RawDetection {
            bounding_box,
            confidence: confidence.min(1.0),
            class_id: class_id as u32,
        });
    }
    Ok(candidates)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs, width, height, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.params.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, size, size])?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }
}

/// Greedy class-aware non-maximum suppression, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id
                && k.bounding_box.iou(&candidate.bounding_box) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
