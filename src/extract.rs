//! Normalizes raw detector output into typed detection instances.

use log::warn;

use crate::detect::{BoundingBox, RawDetections};
use crate::mask::BinaryMask;
use crate::roles::ClassRoleMap;

/// One detected object for one inference cycle.
#[derive(Clone, Debug)]
pub struct DetectionInstance {
    pub class_id: u32,
    pub class_name: String,
    /// Clamped into `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub mask: Option<BinaryMask>,
    /// Set-pixel count of `mask`; 0 without a mask.
    pub area: u64,
}

impl DetectionInstance {
    pub fn new(
        class_id: u32,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
        mask: Option<BinaryMask>,
    ) -> Self {
        let area = mask.as_ref().map(BinaryMask::count).unwrap_or(0);
        Self {
            class_id,
            class_name: class_name.into(),
            confidence: clamp_confidence(confidence),
            bbox: bbox.normalized(),
            mask,
            area,
        }
    }
}

/// Convert one `predict` result into instances, in detection order.
///
/// Output without detections, or without any mask at all, yields an empty list.
pub fn extract(raw: &RawDetections, roles: &ClassRoleMap) -> Vec<DetectionInstance> {
    if raw.is_empty() || !raw.has_masks() {
        return Vec::new();
    }

    let expected_shape = raw
        .detections
        .iter()
        .find_map(|d| d.mask.as_ref().map(BinaryMask::dimensions));

    raw.detections
        .iter()
        .map(|detection| {
            let class_name = raw
                .class_names
                .get(&detection.class_id)
                .cloned()
                .or_else(|| roles.class_name(detection.class_id).map(str::to_string))
                .unwrap_or_else(|| format!("Unknown Class {}", detection.class_id));

            let mask = match (&detection.mask, expected_shape) {
                (Some(mask), Some(shape)) if mask.dimensions() != shape => {
                    warn!(
                        "dropping {}x{} mask for '{}': expected {}x{}",
                        mask.width(),
                        mask.height(),
                        class_name,
                        shape.0,
                        shape.1
                    );
                    None
                }
                (mask, _) => mask.clone(),
            };

            DetectionInstance::new(
                detection.class_id,
                class_name,
                detection.confidence,
                detection.bbox,
                mask,
            )
        })
        .collect()
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::detect::{default_class_names, RawDetection};
    use crate::roles::RoleAssignment;

    fn detection(class_id: u32, mask: Option<BinaryMask>) -> RawDetection {
        RawDetection {
            class_id,
            confidence: 0.8,
            bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            mask,
        }
    }

    fn roles() -> ClassRoleMap {
        ClassRoleMap::build(&default_class_names(), &RoleAssignment::default())
    }

    #[test]
    fn empty_or_maskless_output_yields_nothing() {
        let raw = RawDetections::new(default_class_names());
        assert!(extract(&raw, &roles()).is_empty());

        let mut boxes_only = RawDetections::new(default_class_names());
        boxes_only.push(detection(0, None));
        assert!(extract(&boxes_only, &roles()).is_empty());
    }

    #[test]
    fn computes_area_and_normalizes_fields() {
        let mut raw = RawDetections::new(default_class_names());
        raw.push(RawDetection {
            class_id: 0,
            confidence: 1.7,
            bbox: BoundingBox::new(9.0, 8.0, 1.0, 2.0),
            mask: Some(BinaryMask::from_rect(10, 10, 0, 0, 3, 3)),
        });
        raw.push(detection(4, None));
        let instances = extract(&raw, &roles());
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].class_name, "Apple");
        assert_eq!(instances[0].area, 9);
        assert_eq!(instances[0].confidence, 1.0);
        assert_eq!(instances[0].bbox, BoundingBox::new(1.0, 2.0, 9.0, 8.0));
        assert_eq!(instances[1].class_name, "Black Dot");
        assert_eq!(instances[1].area, 0);
    }

    #[test]
    fn class_name_falls_back_to_role_map_then_placeholder() {
        let mut raw = RawDetections::new(BTreeMap::new());
        raw.push(detection(2, Some(BinaryMask::new(4, 4))));
        raw.push(detection(42, Some(BinaryMask::new(4, 4))));
        let instances = extract(&raw, &roles());
        assert_eq!(instances[0].class_name, "rotten");
        assert_eq!(instances[1].class_name, "Unknown Class 42");
    }

    #[test]
    fn mismatched_mask_is_dropped_but_instance_kept() {
        let mut raw = RawDetections::new(default_class_names());
        raw.push(detection(0, Some(BinaryMask::from_rect(8, 8, 0, 0, 8, 8))));
        raw.push(detection(5, Some(BinaryMask::from_rect(4, 4, 0, 0, 4, 4))));
        let instances = extract(&raw, &roles());
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].area, 64);
        assert!(instances[1].mask.is_none());
        assert_eq!(instances[1].area, 0);
    }
}
