#![cfg(feature = "backend-tract")]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::tract_ndarray::{Ix3, Ix4};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend, PredictParams};
use crate::detect::result::{BoundingBox, RawDetection, RawDetections};
use crate::frame::Frame;
use crate::mask::BinaryMask;

const MASK_THRESHOLD: f32 = 0.5;

/// Tract-based backend for YOLOv8-seg style ONNX models.
///
/// Expects two outputs: predictions `[1, 4 + classes + coeffs, anchors]` and
/// prototypes `[1, coeffs, mh, mw]`. Frames are stretched (no letterbox) to the
/// model input size; boxes and masks are scaled back to frame coordinates.
pub struct OnnxSegBackend {
    model: TypedRunnableModel<TypedModel>,
    class_names: BTreeMap<u32, String>,
    input_width: u32,
    input_height: u32,
}

struct Candidate {
    class_id: u32,
    confidence: f32,
    bbox: BoundingBox,
    coeffs: Vec<f32>,
}

impl OnnxSegBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        class_names: BTreeMap<u32, String>,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            class_names,
            input_width,
            input_height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let (iw, ih) = (self.input_width as usize, self.input_height as usize);
        let pixels = frame.pixels();
        tract_ndarray::Array4::from_shape_fn((1, 3, ih, iw), |(_, channel, y, x)| {
            let sx = (x * fw / iw).min(fw.saturating_sub(1));
            let sy = (y * fh / ih).min(fh.saturating_sub(1));
            pixels[(sy * fw + sx) * 3 + channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(
        &self,
        frame: &Frame,
        outputs: TVec<TValue>,
        params: PredictParams,
    ) -> Result<RawDetections> {
        let preds = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("prediction tensor was not f32")?
            .into_dimensionality::<Ix3>()
            .context("prediction tensor is not rank 3")?;
        let protos = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no mask prototypes"))?
            .to_array_view::<f32>()
            .context("prototype tensor was not f32")?
            .into_dimensionality::<Ix4>()
            .context("prototype tensor is not rank 4")?;

        let num_classes = self.class_names.len();
        let (_, rows, anchors) = preds.dim();
        let (_, num_coeffs, mh, mw) = protos.dim();
        if rows != 4 + num_classes + num_coeffs {
            return Err(anyhow!(
                "prediction rows {} do not match 4 + {} classes + {} coefficients",
                rows,
                num_classes,
                num_coeffs
            ));
        }

        let sx = frame.width as f32 / self.input_width as f32;
        let sy = frame.height as f32 / self.input_height as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best = (0usize, f32::MIN);
            for c in 0..num_classes {
                let score = preds[[0, 4 + c, i]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < params.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                preds[[0, 0, i]],
                preds[[0, 1, i]],
                preds[[0, 2, i]],
                preds[[0, 3, i]],
            );
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            let coeffs = (0..num_coeffs)
                .map(|k| preds[[0, 4 + num_classes + k, i]])
                .collect();
            candidates.push(Candidate {
                class_id: best.0 as u32,
                confidence: best.1,
                bbox,
                coeffs,
            });
        }

        let kept = non_max_suppression(candidates, params.iou_threshold);
        let mut out = RawDetections::new(self.class_names.clone());
        for candidate in kept {
            // Box in prototype grid coordinates, for cropping.
            let px0 = candidate.bbox.x1 / frame.width as f32 * mw as f32;
            let py0 = candidate.bbox.y1 / frame.height as f32 * mh as f32;
            let px1 = candidate.bbox.x2 / frame.width as f32 * mw as f32;
            let py1 = candidate.bbox.y2 / frame.height as f32 * mh as f32;
            let proto_mask = BinaryMask::from_fn(mw as u32, mh as u32, |x, y| {
                let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
                if fx < px0 || fx > px1 || fy < py0 || fy > py1 {
                    return false;
                }
                let logit: f32 = candidate
                    .coeffs
                    .iter()
                    .enumerate()
                    .map(|(k, coeff)| coeff * protos[[0, k, y as usize, x as usize]])
                    .sum();
                sigmoid(logit) > MASK_THRESHOLD
            });
            out.push(RawDetection {
                class_id: candidate.class_id,
                confidence: candidate.confidence,
                bbox: candidate.bbox,
                mask: Some(proto_mask.resized(frame.width, frame.height)),
            });
        }
        Ok(out)
    }
}

impl DetectorBackend for OnnxSegBackend {
    fn name(&self) -> &'static str {
        "onnx"
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
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(frame, outputs, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_width, self.input_height, [0, 0, 0])?;
        self.predict(&blank, PredictParams::default()).map(|_| ())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
