use std::collections::BTreeMap;

use serde::Serialize;

use crate::mask::BinaryMask;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
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

    /// Copy with reversed corners swapped so that `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One raw detection as emitted by a backend.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub mask: Option<BinaryMask>,
}

/// Output of a single `predict` call.
///
/// `class_names` is the backend's id→name table at the time of the call. Detections
/// are in backend order; extraction keeps that order.
#[derive(Clone, Debug, Default)]
pub struct RawDetections {
    pub class_names: BTreeMap<u32, String>,
    pub detections: Vec<RawDetection>,
}

impl RawDetections {
    pub fn new(class_names: BTreeMap<u32, String>) -> Self {
        Self {
            class_names,
            detections: Vec::new(),
        }
    }

    pub fn push(&mut self, detection: RawDetection) {
        self.detections.push(detection);
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// True when at least one detection carries a mask.
    pub fn has_masks(&self) -> bool {
        self.detections.iter().any(|d| d.mask.is_some())
    }
}
