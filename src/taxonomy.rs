//! Fixed clinical taxonomy and the substring matcher over it.
//!
//! The table is constant: a label always maps to the same display name,
//! severity and recommendation. Matching walks [`TAXONOMY_KEYS`] in
//! declaration order and returns the first key contained in the canonical
//! string, so `"left-temporal-glioma-grade-ii"` resolves to glioma.

use crate::finding::{ClinicalLabel, Severity};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Display/severity/recommendation triple for one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyRow {
    pub display_name: &'static str,
    pub severity: Severity,
    pub recommendation: &'static str,
}

const GLIOMA: TaxonomyRow = TaxonomyRow {
    display_name: "Glioma",
    severity: Severity::High,
    recommendation: "Glioma detected. Immediate consultation with neuro-oncologist recommended. \
Consider additional imaging (contrast-enhanced MRI, MRS) and biopsy for definitive diagnosis and grading.",
};

const MENINGIOMA: TaxonomyRow = TaxonomyRow {
    display_name: "Meningioma",
    severity: Severity::Moderate,
    recommendation: "Meningioma detected. Most meningiomas are benign. Follow-up imaging in 3-6 months \
recommended. Surgical consultation if symptomatic or showing growth.",
};

const PITUITARY: TaxonomyRow = TaxonomyRow {
    display_name: "Pituitary Tumor",
    severity: Severity::Moderate,
    recommendation: "Pituitary tumor detected. Endocrine evaluation recommended. Hormone level testing \
and visual field assessment should be performed. Treatment depends on tumor type and hormone activity.",
};

const NO_TUMOR: TaxonomyRow = TaxonomyRow {
    display_name: "No Tumor Detected",
    severity: Severity::None,
    recommendation: "No tumor detected in this MRI scan. If symptoms persist, consider follow-up \
imaging or alternative diagnostic approaches.",
};

/// Row lookup. Total over [`ClinicalLabel`].
pub fn row(label: ClinicalLabel) -> &'static TaxonomyRow {
    match label {
        ClinicalLabel::Glioma => &GLIOMA,
        ClinicalLabel::Meningioma => &MENINGIOMA,
        ClinicalLabel::Pituitary => &PITUITARY,
        ClinicalLabel::NoTumor => &NO_TUMOR,
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Taxonomy keys in match precedence order. Both no-tumor spellings are kept
/// so either form from upstream resolves.
pub const TAXONOMY_KEYS: [(&str, ClinicalLabel); 5] = [
    ("glioma", ClinicalLabel::Glioma),
    ("meningioma", ClinicalLabel::Meningioma),
    ("pituitary", ClinicalLabel::Pituitary),
    ("notumor", ClinicalLabel::NoTumor),
    ("no tumor", ClinicalLabel::NoTumor),
];

/// Token used when nothing can be extracted from a payload.
pub const FALLBACK_TOKEN: &str = "notumor";

/// Lower-case and trim.
pub fn canonicalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// First taxonomy key contained in `canonical`, with its label.
pub fn find_key(canonical: &str) -> Option<(&'static str, ClinicalLabel)> {
    TAXONOMY_KEYS
        .iter()
        .find(|(key, _)| canonical.contains(key))
        .copied()
}

/// Resolve a canonical string to a label, defaulting to no-tumor.
pub fn match_label(canonical: &str) -> ClinicalLabel {
    find_key(canonical)
        .map(|(_, label)| label)
        .unwrap_or(ClinicalLabel::NoTumor)
}
