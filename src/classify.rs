//! Defect classification from overlapping instance masks.
//!
//! Area defects are graded by how much of their mask lies on the reference object
//! (the union of all reference masks). Unconditional defects are always severe.
//! `classify` is pure apart from logging.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serde::Serialize;

use crate::detect::BoundingBox;
use crate::extract::DetectionInstance;
use crate::mask::BinaryMask;
use crate::roles::{ClassRole, ClassRoleMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Normal,
    Minor,
    Severe,
}

/// Validated percentage bounds, `0 <= minor < severe <= 100`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeverityThresholds {
    minor_percent: f64,
    severe_percent: f64,
}

impl SeverityThresholds {
    pub fn new(minor_percent: f64, severe_percent: f64) -> Result<Self> {
        if !minor_percent.is_finite() || !severe_percent.is_finite() {
            return Err(anyhow!("severity thresholds must be finite numbers"));
        }
        if minor_percent < 0.0 || severe_percent > 100.0 {
            return Err(anyhow!(
                "severity thresholds must lie within 0..=100 (minor {}, severe {})",
                minor_percent,
                severe_percent
            ));
        }
        if minor_percent >= severe_percent {
            return Err(anyhow!(
                "minor threshold {} must be below severe threshold {}",
                minor_percent,
                severe_percent
            ));
        }
        Ok(Self {
            minor_percent,
            severe_percent,
        })
    }

    pub fn minor_percent(&self) -> f64 {
        self.minor_percent
    }

    pub fn severe_percent(&self) -> f64 {
        self.severe_percent
    }

    /// Severe is checked first; both bounds are inclusive.
    pub fn grade(&self, percent: f64) -> Severity {
        if percent >= self.severe_percent {
            Severity::Severe
        } else if percent >= self.minor_percent {
            Severity::Minor
        } else {
            Severity::Normal
        }
    }
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            minor_percent: 10.0,
            severe_percent: 15.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub class_id: u32,
    pub source_class: String,
    pub severity: Severity,
    /// Reason label of the class, e.g. `Rotten`.
    pub reason: String,
    /// Reason label plus, for area defects, the overlap percentage.
    pub reason_detail: String,
    pub area_overlap_percent: Option<f64>,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// Area defects were present but no reference object covered any pixel.
    NoReferenceObject { skipped_area_defects: usize },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    /// Unconditional results first, then non-Normal area results, each in detection order.
    pub results: Vec<ClassificationResult>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Classification {
    pub fn worst_severity(&self) -> Severity {
        self.results
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::Normal)
    }
}

/// Percentage of the reference area covered by `overlap` pixels.
pub fn overlap_percent(overlap: u64, reference_area: u64) -> f64 {
    if reference_area == 0 {
        return 0.0;
    }
    100.0 * overlap as f64 / reference_area as f64
}

pub fn classify(
    instances: &[DetectionInstance],
    roles: &ClassRoleMap,
    thresholds: &SeverityThresholds,
) -> Classification {
    let mut classification = Classification::default();
    let mut references = Vec::new();
    let mut area_defects = Vec::new();

    for instance in instances {
        match roles.role_of(instance.class_id) {
            Some(ClassRole::UnconditionalDefect) => {
                let label = roles.reason_label(instance.class_id, &instance.class_name);
                debug!(
                    "{} ({:.2}) is an unconditional defect",
                    instance.class_name, instance.confidence
                );
                classification.results.push(ClassificationResult {
                    class_id: instance.class_id,
                    source_class: instance.class_name.clone(),
                    severity: Severity::Severe,
                    reason: label.clone(),
                    reason_detail: label,
                    area_overlap_percent: None,
                    confidence: instance.confidence,
                    bbox: instance.bbox,
                });
            }
            Some(ClassRole::Reference) => references.push(instance),
            Some(ClassRole::AreaDefect) => area_defects.push(instance),
            None => {}
        }
    }

    if area_defects.is_empty() {
        return classification;
    }

    let union = reference_union(&references);
    let union_area = union.as_ref().map(BinaryMask::count).unwrap_or(0);
    let Some(union) = union.filter(|_| union_area > 0) else {
        warn!(
            "no reference object detected; skipping {} area defect(s)",
            area_defects.len()
        );
        classification
            .diagnostics
            .push(Diagnostic::NoReferenceObject {
                skipped_area_defects: area_defects.len(),
            });
        return classification;
    };

    for instance in area_defects {
        let overlap = match &instance.mask {
            Some(mask) => match mask.intersection_count(&union) {
                Ok(count) => count,
                Err(err) => {
                    warn!("skipping '{}': {}", instance.class_name, err);
                    continue;
                }
            },
            None => 0,
        };
        let percent = overlap_percent(overlap, union_area);
        let severity = thresholds.grade(percent);
        debug!(
            "{} covers {:.2}% of the reference ({:?})",
            instance.class_name, percent, severity
        );
        if severity == Severity::Normal {
            continue;
        }
        let label = roles.reason_label(instance.class_id, &instance.class_name);
        classification.results.push(ClassificationResult {
            class_id: instance.class_id,
            source_class: instance.class_name.clone(),
            severity,
            reason_detail: format!("{} ({:.2}%)", label, percent),
            reason: label,
            area_overlap_percent: Some(percent),
            confidence: instance.confidence,
            bbox: instance.bbox,
        });
    }

    classification
}

/// OR of all reference masks. Masks of a different shape than the first are skipped.
fn reference_union(references: &[&DetectionInstance]) -> Option<BinaryMask> {
    let mut masks = references.iter().filter_map(|r| r.mask.as_ref());
    let mut union = masks.next()?.clone();
    for mask in masks {
        if let Err(err) = union.union_with(mask) {
            warn!("ignoring reference mask: {}", err);
        }
    }
    Some(union)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::detect::default_class_names;
    use crate::roles::RoleAssignment;

    const APPLE: u32 = 0;
    const BRUISE: u32 = 1;
    const STEM: u32 = 3;
    const BLACK_DOT: u32 = 4;
    const DENT: u32 = 5;

    fn roles() -> ClassRoleMap {
        ClassRoleMap::build(
            &default_class_names(),
            &RoleAssignment {
                reference: vec!["Apple".into()],
                unconditional_defect: vec!["Bruise".into(), "rotten".into()],
                area_defect: vec!["Black Dot".into(), "dent".into()],
                labels: BTreeMap::new(),
            },
        )
    }

    fn thresholds() -> SeverityThresholds {
        SeverityThresholds::new(10.0, 30.0).unwrap()
    }

    fn instance(class_id: u32, mask: Option<BinaryMask>) -> DetectionInstance {
        let name = default_class_names()[&class_id].clone();
        DetectionInstance::new(class_id, name, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0), mask)
    }

    /// Reference covers the top half (1000 pixels) of a 100x20 grid.
    fn apple() -> DetectionInstance {
        instance(APPLE, Some(BinaryMask::from_rect(100, 20, 0, 0, 100, 10)))
    }

    /// Defect mask with `on` pixels on the apple and `off` pixels beside it.
    fn defect(class_id: u32, on: u32, off: u32) -> DetectionInstance {
        let mut mask = BinaryMask::new(100, 20);
        for i in 0..on {
            mask.set(i % 100, i / 100, true);
        }
        for i in 0..off {
            mask.set(i % 100, 10 + i / 100, true);
        }
        instance(class_id, Some(mask))
    }

    #[test]
    fn threshold_construction_is_validated() {
        assert!(SeverityThresholds::new(10.0, 15.0).is_ok());
        assert!(SeverityThresholds::new(15.0, 15.0).is_err());
        assert!(SeverityThresholds::new(20.0, 10.0).is_err());
        assert!(SeverityThresholds::new(-1.0, 10.0).is_err());
        assert!(SeverityThresholds::new(10.0, 100.5).is_err());
        assert!(SeverityThresholds::new(f64::NAN, 10.0).is_err());
        assert!(SeverityThresholds::new(0.0, 100.0).is_ok());
    }

    #[test]
    fn grading_bounds_are_inclusive() {
        let t = thresholds();
        for (percent, expected) in [
            (0.0, Severity::Normal),
            (9.999, Severity::Normal),
            (10.0, Severity::Minor),
            (29.99, Severity::Minor),
            (30.0, Severity::Severe),
            (100.0, Severity::Severe),
        ] {
            assert_eq!(t.grade(percent), expected, "percent {}", percent);
        }
    }

    #[test]
    fn grading_holds_across_threshold_pairs() {
        for minor in (0..100).step_by(7) {
            for severe in (minor + 1..=100).step_by(9) {
                let t = SeverityThresholds::new(minor as f64, severe as f64).unwrap();
                for p in 0..=100 {
                    let p = p as f64;
                    let expected = if p >= severe as f64 {
                        Severity::Severe
                    } else if p >= minor as f64 {
                        Severity::Minor
                    } else {
                        Severity::Normal
                    };
                    assert_eq!(t.grade(p), expected);
                }
            }
        }
    }

    #[test]
    fn overlap_percent_is_monotonic_and_bounded() {
        assert_eq!(overlap_percent(0, 1000), 0.0);
        assert_eq!(overlap_percent(1000, 1000), 100.0);
        assert_eq!(overlap_percent(5, 0), 0.0);
        let mut last = -1.0;
        for overlap in 0..=1000 {
            let p = overlap_percent(overlap, 1000);
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn fourteen_percent_overlap_is_minor() {
        let result = classify(&[apple(), defect(BLACK_DOT, 140, 25)], &roles(), &thresholds());
        assert_eq!(result.results.len(), 1);
        let r = &result.results[0];
        assert_eq!(r.severity, Severity::Minor);
        assert_eq!(r.area_overlap_percent, Some(14.0));
        assert_eq!(r.reason_detail, "Black Dot (14.00%)");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn thirty_two_percent_overlap_is_severe() {
        let result = classify(&[apple(), defect(DENT, 320, 0)], &roles(), &thresholds());
        assert_eq!(result.results[0].severity, Severity::Severe);
        assert_eq!(result.results[0].area_overlap_percent, Some(32.0));
        assert_eq!(result.results[0].source_class, "dent");
    }

    #[test]
    fn small_overlap_is_dropped() {
        let result = classify(&[apple(), defect(DENT, 50, 500)], &roles(), &thresholds());
        assert!(result.results.is_empty());
        assert_eq!(result.worst_severity(), Severity::Normal);
    }

    #[test]
    fn missing_reference_records_diagnostic() {
        let result = classify(&[defect(BLACK_DOT, 300, 0)], &roles(), &thresholds());
        assert!(result.results.is_empty());
        assert_eq!(
            result.diagnostics,
            vec![Diagnostic::NoReferenceObject {
                skipped_area_defects: 1
            }]
        );
    }

    #[test]
    fn empty_reference_mask_counts_as_missing() {
        let empty_apple = instance(APPLE, Some(BinaryMask::new(100, 20)));
        let result = classify(&[empty_apple, defect(DENT, 300, 0)], &roles(), &thresholds());
        assert!(result.results.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn unconditional_defect_without_mask_is_severe() {
        let result = classify(&[instance(BRUISE, None)], &roles(), &thresholds());
        assert_eq!(result.results.len(), 1);
        let r = &result.results[0];
        assert_eq!(r.severity, Severity::Severe);
        assert_eq!(r.area_overlap_percent, None);
        assert_eq!(r.confidence, 0.9);
        assert_eq!(r.reason_detail, "Bruise");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn unconditional_results_come_first() {
        let result = classify(
            &[
                defect(BLACK_DOT, 400, 0),
                apple(),
                instance(STEM, Some(BinaryMask::from_rect(100, 20, 0, 0, 5, 5))),
                instance(BRUISE, Some(BinaryMask::new(100, 20))),
                defect(DENT, 150, 0),
            ],
            &roles(),
            &thresholds(),
        );
        let order: Vec<(&str, Severity)> = result
            .results
            .iter()
            .map(|r| (r.source_class.as_str(), r.severity))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Bruise", Severity::Severe),
                ("Black Dot", Severity::Severe),
                ("dent", Severity::Minor),
            ]
        );
        assert_eq!(result.worst_severity(), Severity::Severe);
    }

    #[test]
    fn multiple_references_are_unioned() {
        let left = instance(APPLE, Some(BinaryMask::from_rect(100, 20, 0, 0, 50, 10)));
        let right = instance(APPLE, Some(BinaryMask::from_rect(100, 20, 40, 0, 100, 10)));
        // union = 1000 pixels, defect covers 100 of them
        let result = classify(&[left, right, defect(DENT, 100, 0)], &roles(), &thresholds());
        assert_eq!(result.results[0].area_overlap_percent, Some(10.0));
        assert_eq!(result.results[0].severity, Severity::Minor);
    }
}
