//! Clinical finding data structures.
//!
//! A [`ClinicalFinding`] is the only thing the rest of the application ever
//! sees from a classification: a closed [`ClinicalLabel`], the fixed
//! display/severity/recommendation triple for that label, and a confidence in
//! `[0, 100]`. Findings can only be built from a label, so the triple always
//! matches the taxonomy row.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::taxonomy;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Tumor class produced by the normalizer.
///
/// Serialized in the persistence vocabulary (`notumor`, not `no-tumor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClinicalLabel {
    Glioma,
    Meningioma,
    Pituitary,
    #[serde(rename = "notumor", alias = "no-tumor")]
    NoTumor,
}

impl ClinicalLabel {
    /// All labels, in taxonomy order.
    pub const ALL: [ClinicalLabel; 4] = [
        ClinicalLabel::Glioma,
        ClinicalLabel::Meningioma,
        ClinicalLabel::Pituitary,
        ClinicalLabel::NoTumor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glioma => "glioma",
            Self::Meningioma => "meningioma",
            Self::Pituitary => "pituitary",
            Self::NoTumor => "no-tumor",
        }
    }

    /// The token the upstream model uses for this class.
    pub fn model_token(&self) -> &'static str {
        match self {
            Self::NoTumor => "notumor",
            other => other.as_str(),
        }
    }

    pub fn is_tumor(&self) -> bool {
        !matches!(self, Self::NoTumor)
    }
}

impl std::fmt::Display for ClinicalLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clinical urgency attached to a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Moderate,
    Low,
    None,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Moderate => "Moderate",
            Self::Low => "Low",
            Self::None => "None",
        }
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// Normalized, immutable classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalFinding {
    label: ClinicalLabel,
    display_name: &'static str,
    confidence: f64,
    severity: Severity,
    recommendation: &'static str,
}

impl ClinicalFinding {
    /// Build a finding for `label`. Confidence is clamped to `[0, 100]`;
    /// a NaN confidence becomes 0.
    pub fn new(label: ClinicalLabel, confidence: f64) -> Self {
        let row = taxonomy::row(label);
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 100.0)
        };
        Self {
            label,
            display_name: row.display_name,
            confidence,
            severity: row.severity,
            recommendation: row.recommendation,
        }
    }

    pub fn label(&self) -> ClinicalLabel {
        self.label
    }

    pub fn display_name(&self) -> &'static str {
        self.display_name
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn recommendation(&self) -> &'static str {
        self.recommendation
    }

    pub fn tumor_detected(&self) -> bool {
        self.label.is_tumor()
    }
}

/// Flat persistence record: `label, displayName, confidence, severity,
/// recommendation, tumorDetected`.
impl Serialize for ClinicalFinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ClinicalFinding", 6)?;
        s.serialize_field("label", &self.label)?;
        s.serialize_field("displayName", self.display_name)?;
        s.serialize_field("confidence", &self.confidence)?;
        s.serialize_field("severity", &self.severity)?;
        s.serialize_field("recommendation", self.recommendation)?;
        s.serialize_field("tumorDetected", &self.tumor_detected())?;
        s.end()
    }
}
