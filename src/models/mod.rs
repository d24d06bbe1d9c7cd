// Data Models
// Report and wire shapes shared by the detector, the HTTP API and the CLI

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ============ Label ============

/// Binary authorship label; serialized as `0` (AI) or `1` (human).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    Ai,
    Human,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ai => 0,
            Self::Human => 1,
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        label.as_u8()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLabel(pub u8);

impl fmt::Display for InvalidLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label must be 0 or 1, got {}", self.0)
    }
}

impl TryFrom<u8> for Label {
    type Error = InvalidLabel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ai),
            1 => Ok(Self::Human),
            other => Err(InvalidLabel(other)),
        }
    }
}

// ============ Detection Report ============

// 2^53: above this an f64 no longer holds every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Whole scores go on the wire as JSON integers (`18`, not `18.0`).
fn serialize_score<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    #[serde(rename = "Perplexity", serialize_with = "serialize_score")]
    pub perplexity: f64,
    #[serde(rename = "Perplexity per line", serialize_with = "serialize_score")]
    pub perplexity_per_line: f64,
    #[serde(rename = "Burstiness", serialize_with = "serialize_score")]
    pub burstiness: f64,
    pub label: Label,
}

/// Perplexity of one segmented line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineScore {
    /// Position among all segmented lines, counting skipped ones
    pub index: usize,
    pub text: String,
    pub perplexity: f64,
}

// ============ HTTP shapes ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub output: String,
    pub results: DetectionReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub context_limit: usize,
    pub stride: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_keys() {
        let response = DetectResponse {
            output: "The Text is generated by AI.".to_string(),
            results: DetectionReport {
                perplexity: 18.0,
                perplexity_per_line: 34.333333333333336,
                burstiness: 46.0,
                label: Label::Ai,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["output"], "The Text is generated by AI.");
        assert_eq!(json["results"]["Perplexity"], 18.0);
        assert_eq!(json["results"]["Perplexity per line"], 34.333333333333336);
        assert_eq!(json["results"]["Burstiness"], 46.0);
        assert_eq!(json["results"]["label"], 0);
        assert_eq!(json["results"].as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_whole_scores_serialize_as_integers() {
        let report = DetectionReport {
            perplexity: 18.0,
            perplexity_per_line: 34.5,
            burstiness: 46.0,
            label: Label::Ai,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"{"Perplexity":18,"Perplexity per line":34.5,"Burstiness":46,"label":0}"#
        );

        let back: DetectionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_label_from_wire() {
        let report: DetectionReport = serde_json::from_str(
            r#"{"Perplexity": 90, "Perplexity per line": 85.5, "Burstiness": 120, "label": 1}"#,
        )
        .unwrap();
        assert_eq!(report.label, Label::Human);

        let bad = serde_json::from_str::<DetectionReport>(
            r#"{"Perplexity": 1, "Perplexity per line": 1, "Burstiness": 1, "label": 2}"#,
        );
        assert!(bad.is_err());
    }
}
