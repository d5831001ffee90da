use std::collections::BTreeMap;

use anyhow::Result;

use crate::detect::result::RawDetections;
use crate::frame::Frame;

/// Output kinds a backend can produce.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    BoundingBoxes,
    InstanceMasks,
}

/// Thresholds forwarded to the model on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictParams {
    /// Minimum confidence for a detection to be kept.
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes of the same class are suppressed.
    pub iou_threshold: f32,
}

impl Default for PredictParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.5,
        }
    }
}

/// Segmentation detector backend.
///
/// Backends own their model state and are driven from a single thread at a time
/// (the registry wraps them in a `Mutex`). `predict` must not retain the frame.
pub trait DetectorBackend: Send {
    /// Backend identifier used in configuration.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Class id to name table of the loaded model.
    fn class_names(&self) -> &BTreeMap<u32, String>;

    /// Run the model on one frame.
    fn predict(&mut self, frame: &Frame, params: PredictParams) -> Result<RawDetections>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
