use serde::{Deserialize, Serialize};

use crate::severity::AssessError;

/// Class id the pothole model reports for its single class.
pub const POTHOLE_CLASS_ID: u32 = 0;

/// Axis-aligned box in pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Intersection over union. Zero when both boxes are empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.area() + other.area() - self.intersection(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection(other) / union
    }

    /// Clip the box to `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("BoundingBox", 6)?;
        s.serialize_field("x1", &self.x1)?;
        s.serialize_field("y1", &self.y1)?;
        s.serialize_field("x2", &self.x2)?;
        s.serialize_field("y2", &self.y2)?;
        s.serialize_field("width", &self.width())?;
        s.serialize_field("height", &self.height())?;
        s.end()
    }
}

/// Unvalidated detection as produced by a detector backend.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    #[serde(default = "pothole_class_id")]
    pub class_id: u32,
}

fn pothole_class_id() -> u32 {
    POTHOLE_CLASS_ID
}

/// Validated pothole detection.
///
/// Fields are private so the box ordering and confidence range hold for every
/// value. The area is always derived from the box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    bounding_box: BoundingBox,
    confidence: f32,
    class_id: u32,
}

impl Detection {
    pub fn new(bounding_box: BoundingBox, confidence: f32, class_id: u32) -> Result<Self, AssessError> {
        if !bounding_box.is_well_formed() {
            return Err(AssessError::InvalidDetection(format!(
                "bounding box ({}, {}, {}, {}) is degenerate or out of order",
                bounding_box.x1, bounding_box.y1, bounding_box.x2, bounding_box.y2
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(AssessError::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            bounding_box,
            confidence,
            class_id,
        })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// Area in pixels, computed in f64 from the box.
    pub fn area(&self) -> f64 {
        let b = &self.bounding_box;
        (b.x2 as f64 - b.x1 as f64) * (b.y2 as f64 - b.y1 as f64)
    }
}

impl TryFrom<RawDetection> for Detection {
    type Error = AssessError;

    fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
        Detection::new(raw.bounding_box, raw.confidence, raw.class_id)
    }
}

impl Serialize for Detection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Detection", 5)?;
        s.serialize_field("type", "pothole")?;
        s.serialize_field("confidence", &self.confidence)?;
        s.serialize_field("boundingBox", &self.bounding_box)?;
        s.serialize_field("area", &self.area())?;
        s.serialize_field("classId", &self.class_id)?;
        s.end()
    }
}
