//! Draws detection overlays onto frame copies.

use crate::classify::{ClassificationResult, Severity};
use crate::detect::BoundingBox;
use crate::extract::DetectionInstance;
use crate::frame::{Frame, Rgb};
use crate::roles::{ClassRole, ClassRoleMap};

const REFERENCE_COLOR: Rgb = [40, 200, 60];
const UNCONDITIONAL_COLOR: Rgb = [220, 30, 220];
const AREA_DEFECT_COLOR: Rgb = [30, 140, 255];
const UNASSIGNED_COLOR: Rgb = [180, 180, 180];
const SEVERE_COLOR: Rgb = [255, 0, 0];
const MINOR_COLOR: Rgb = [255, 165, 0];

#[derive(Clone, Copy, Debug)]
pub struct Annotator {
    pub mask_alpha: f32,
    pub box_thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            mask_alpha: 0.4,
            box_thickness: 2,
        }
    }
}

impl Annotator {
    /// Copy of `frame` with every instance's mask tinted and box outlined by role.
    pub fn draw_instances(
        &self,
        frame: &Frame,
        instances: &[DetectionInstance],
        roles: &ClassRoleMap,
    ) -> Frame {
        let mut out = frame.clone();
        for instance in instances {
            let color = role_color(roles.role_of(instance.class_id));
            if let Some(mask) = &instance.mask {
                if mask.dimensions() == out.dimensions() {
                    for (x, y) in mask.iter_set() {
                        out.blend_pixel(x, y, color, self.mask_alpha);
                    }
                }
            }
            draw_box(&mut out, &instance.bbox, color, 1);
        }
        out
    }

    /// Outline classified defects in place: red for severe, orange for minor.
    pub fn draw_results(&self, frame: &mut Frame, results: &[ClassificationResult]) {
        for result in results {
            let color = match result.severity {
                Severity::Severe => SEVERE_COLOR,
                Severity::Minor => MINOR_COLOR,
                Severity::Normal => continue,
            };
            draw_box(frame, &result.bbox, color, self.box_thickness);
        }
    }
}

fn role_color(role: Option<ClassRole>) -> Rgb {
    match role {
        Some(ClassRole::Reference) => REFERENCE_COLOR,
        Some(ClassRole::UnconditionalDefect) => UNCONDITIONAL_COLOR,
        Some(ClassRole::AreaDefect) => AREA_DEFECT_COLOR,
        None => UNASSIGNED_COLOR,
    }
}

/// Rectangle outline clipped to the frame.
pub fn draw_box(frame: &mut Frame, bbox: &BoundingBox, color: Rgb, thickness: u32) {
    if frame.width == 0 || frame.height == 0 {
        return;
    }
    let max_x = frame.width as f32 - 1.0;
    let max_y = frame.height as f32 - 1.0;
    let x0 = bbox.x1.clamp(0.0, max_x) as u32;
    let y0 = bbox.y1.clamp(0.0, max_y) as u32;
    let x1 = bbox.x2.clamp(0.0, max_x) as u32;
    let y1 = bbox.y2.clamp(0.0, max_y) as u32;
    for t in 0..thickness {
        for x in x0..=x1 {
            frame.put_pixel(x, y0.saturating_add(t), color);
            frame.put_pixel(x, y1.saturating_sub(t), color);
        }
        for y in y0..=y1 {
            frame.put_pixel(x0.saturating_add(t), y, color);
            frame.put_pixel(x1.saturating_sub(t), y, color);
        }
    }
}
