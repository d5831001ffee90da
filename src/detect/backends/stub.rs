use std::collections::{BTreeMap, VecDeque};

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend, PredictParams};
use crate::detect::result::{BoundingBox, RawDetection, RawDetections};
use crate::frame::{Frame, Rgb};
use crate::mask::BinaryMask;

/// Class table used by the stub backend and the synthetic source.
pub const STUB_CLASS_NAMES: [&str; 8] = [
    "Apple",
    "Bruise",
    "rotten",
    "stem",
    "Black Dot",
    "dent",
    "scratch",
    "unriped",
];

const APPLE_CLASS: u32 = 0;
const BLEMISH_CLASS: u32 = 4;
const MIN_REGION_PIXELS: u64 = 16;

/// One scripted `predict` outcome.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(RawDetections),
    Fail(String),
}

/// Stub backend for tests and demos.
///
/// Scripted steps are returned in order; once the script is exhausted the backend
/// falls back to a colour-threshold segmenter tuned for the `stub://` source: red
/// pixels are the apple, near-black pixels are a "Black Dot" blemish on it.
pub struct StubBackend {
    class_names: BTreeMap<u32, String>,
    script: VecDeque<ScriptStep>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_class_names(default_class_names())
    }

    pub fn with_class_names(class_names: BTreeMap<u32, String>) -> Self {
        Self {
            class_names,
            script: VecDeque::new(),
            calls: 0,
        }
    }

    /// Queue detections to return on a future call.
    pub fn push(&mut self, detections: RawDetections) {
        self.script.push_back(ScriptStep::Detections(detections));
    }

    /// Queue a failing call.
    pub fn push_failure(&mut self, message: &str) {
        self.script.push_back(ScriptStep::Fail(message.to_string()));
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn segment(&self, frame: &Frame) -> RawDetections {
        let (width, height) = frame.dimensions();
        let blemish = BinaryMask::from_fn(width, height, |x, y| {
            frame.pixel(x, y).map(is_blemish).unwrap_or(false)
        });
        let apple = BinaryMask::from_fn(width, height, |x, y| {
            frame
                .pixel(x, y)
                .map(|px| is_apple(px) || is_blemish(px))
                .unwrap_or(false)
        });

        let mut out = RawDetections::new(self.class_names.clone());
        for (class_id, mask, confidence) in [(APPLE_CLASS, apple, 0.92), (BLEMISH_CLASS, blemish, 0.81)] {
            if mask.count() < MIN_REGION_PIXELS {
                continue;
            }
            let Some((x0, y0, x1, y1)) = mask.bounds() else {
                continue;
            };
            out.push(RawDetection {
                class_id,
                confidence,
                bbox: BoundingBox::new(x0 as f32, y0 as f32, x1 as f32, y1 as f32),
                mask: Some(mask),
            });
        }
        out
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::BoundingBoxes | DetectionCapability::InstanceMasks
        )
    }

    fn class_names(&self) -> &BTreeMap<u32, String> {
        &self.class_names
    }

    fn predict(&mut self, frame: &Frame, params: PredictParams) -> Result<RawDetections> {
        self.calls += 1;
        let mut out = match self.script.pop_front() {
            Some(ScriptStep::Detections(detections)) => detections,
            Some(ScriptStep::Fail(message)) => return Err(anyhow!(message)),
            None => self.segment(frame),
        };
        out.detections
            .retain(|d| d.confidence >= params.confidence_threshold);
        Ok(out)
    }
}

pub fn default_class_names() -> BTreeMap<u32, String> {
    STUB_CLASS_NAMES
        .iter()
        .enumerate()
        .map(|(id, name)| (id as u32, name.to_string()))
        .collect()
}

fn is_apple([r, g, b]: Rgb) -> bool {
    r > 150 && g < 100 && b < 100
}

fn is_blemish([r, g, b]: Rgb) -> bool {
    r < 70 && g < 70 && b < 70
}
