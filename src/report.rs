//! Inspection reports sent to result sinks.

use chrono::NaiveDateTime;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::classify::{Classification, ClassificationResult, Severity};

/// Overall verdict for one inspected frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum InspectionStatus {
    Normal,
    Substandard,
    Defective,
}

impl InspectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionStatus::Normal => "Normal",
            InspectionStatus::Substandard => "Substandard",
            InspectionStatus::Defective => "Defective",
        }
    }

    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Severe => InspectionStatus::Defective,
            Severity::Minor => InspectionStatus::Substandard,
            Severity::Normal => InspectionStatus::Normal,
        }
    }
}

impl std::fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionReport {
    pub detection_time: NaiveDateTime,
    pub status: InspectionStatus,
    pub defect_count: usize,
    pub defect_summary: String,
    pub image_url: Option<String>,
    #[serde(serialize_with = "serialize_defects")]
    pub defects: Vec<ClassificationResult>,
    /// Sequence of the frame state this report was computed from.
    #[serde(skip)]
    pub sequence: u64,
}

impl InspectionReport {
    pub fn from_classification(
        sequence: u64,
        detection_time: NaiveDateTime,
        classification: &Classification,
    ) -> Self {
        let defects = classification.results.clone();
        Self {
            detection_time,
            status: InspectionStatus::from_severity(classification.worst_severity()),
            defect_count: defects.len(),
            defect_summary: summarize(&defects),
            image_url: None,
            defects,
            sequence,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.status == InspectionStatus::Normal
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Compact verdict message for line controllers.
    pub fn verdict(&self) -> Verdict<'_> {
        Verdict {
            status: self.status,
            timestamp: self.detection_time,
            defect_count: self.defect_count,
            image_url: self.image_url.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict<'a> {
    pub status: InspectionStatus,
    pub timestamp: NaiveDateTime,
    pub defect_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<&'a str>,
}

/// Wire shape of one defect entry.
#[derive(Debug, Serialize)]
struct DefectRecord<'a> {
    class: &'a str,
    confidence: f32,
    reason: &'static str,
    #[serde(rename = "detailedReason")]
    detailed_reason: &'a str,
    #[serde(rename = "box")]
    bbox: [f32; 4],
    area_percent_on_apple: Option<f64>,
}

impl<'a> From<&'a ClassificationResult> for DefectRecord<'a> {
    fn from(result: &'a ClassificationResult) -> Self {
        Self {
            class: &result.source_class,
            confidence: result.confidence,
            reason: InspectionStatus::from_severity(result.severity).as_str(),
            detailed_reason: &result.reason_detail,
            bbox: result.bbox.as_array(),
            area_percent_on_apple: result.area_overlap_percent,
        }
    }
}

fn serialize_defects<S: Serializer>(
    defects: &[ClassificationResult],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(defects.len()))?;
    for defect in defects {
        seq.serialize_element(&DefectRecord::from(defect))?;
    }
    seq.end()
}

/// Distinct reason labels in first-seen order, or `Normal` without defects.
fn summarize(defects: &[ClassificationResult]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for defect in defects {
        if !seen.contains(&defect.reason.as_str()) {
            seen.push(&defect.reason);
        }
    }
    if seen.is_empty() {
        "Normal".to_string()
    } else {
        seen.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::Value;

    use super::*;
    use crate::detect::BoundingBox;

    fn time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 5))
            .unwrap()
    }

    fn result(class: &str, severity: Severity, percent: Option<f64>) -> ClassificationResult {
        let reason = crate::roles::default_reason_label(class);
        ClassificationResult {
            class_id: 0,
            source_class: class.to_string(),
            severity,
            reason_detail: match percent {
                Some(p) => format!("{} ({:.2}%)", reason, p),
                None => reason.clone(),
            },
            reason,
            area_overlap_percent: percent,
            confidence: 0.75,
            bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
        }
    }

    fn classification(results: Vec<ClassificationResult>) -> Classification {
        Classification {
            results,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn status_follows_worst_severity() {
        let normal = InspectionReport::from_classification(1, time(), &classification(vec![]));
        assert_eq!(normal.status, InspectionStatus::Normal);
        assert_eq!(normal.defect_summary, "Normal");
        assert_eq!(normal.defect_count, 0);

        let minor = InspectionReport::from_classification(
            2,
            time(),
            &classification(vec![result("dent", Severity::Minor, Some(12.0))]),
        );
        assert_eq!(minor.status, InspectionStatus::Substandard);

        let severe = InspectionReport::from_classification(
            3,
            time(),
            &classification(vec![
                result("dent", Severity::Minor, Some(12.0)),
                result("rotten", Severity::Severe, None),
            ]),
        );
        assert_eq!(severe.status, InspectionStatus::Defective);
        assert_eq!(severe.defect_count, 2);
    }

    #[test]
    fn summary_lists_distinct_reasons_in_order() {
        let report = InspectionReport::from_classification(
            1,
            time(),
            &classification(vec![
                result("rotten", Severity::Severe, None),
                result("dent", Severity::Minor, Some(11.0)),
                result("rotten", Severity::Severe, None),
            ]),
        );
        assert_eq!(report.defect_summary, "Rotten, Dent");
    }

    #[test]
    fn json_uses_consumer_field_names() {
        let mut report = InspectionReport::from_classification(
            9,
            time(),
            &classification(vec![
                result("Bruise", Severity::Severe, None),
                result("dent", Severity::Minor, Some(14.0)),
            ]),
        );
        report.image_url = Some("http://host/snap.jpg".into());
        let json: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["detectionTime"], "2024-05-01T12:30:05");
        assert_eq!(json["status"], "Defective");
        assert_eq!(json["defectCount"], 2);
        assert_eq!(json["imageUrl"], "http://host/snap.jpg");
        assert!(json.get("sequence").is_none());
        let defects = json["defects"].as_array().unwrap();
        assert_eq!(defects[0]["class"], "Bruise");
        assert_eq!(defects[0]["reason"], "Defective");
        assert_eq!(defects[0]["detailedReason"], "Bruise");
        assert!(defects[0]["area_percent_on_apple"].is_null());
        assert_eq!(defects[1]["reason"], "Substandard");
        assert_eq!(defects[1]["area_percent_on_apple"], 14.0);
        assert_eq!(defects[1]["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn verdict_is_compact() {
        let report = InspectionReport::from_classification(1, time(), &classification(vec![]));
        let json = serde_json::to_value(report.verdict()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "Normal",
                "timestamp": "2024-05-01T12:30:05",
                "defectCount": 0
            })
        );
    }
}
