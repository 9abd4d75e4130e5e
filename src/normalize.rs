//! Prediction normalizer.
//!
//! Turns whatever the remote classifier sent back into a [`ClinicalFinding`].
//! Extraction is an ordered strategy chain over the JSON shape:
//!
//! 1. a string payload is used directly;
//! 2. an object is probed for `label`, then `class`, then `prediction`;
//! 3. otherwise the first string value of the object (index-like keys
//!    ascending first, then emitted order);
//! 4. anything else resolves to the `notumor` token.
//!
//! The canonical string is then matched against the taxonomy by substring.
//! [`normalize`] is total: every JSON value yields a finding.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::confidence::ConfidenceSource;
use crate::finding::{ClinicalFinding, ClinicalLabel};
use crate::taxonomy::{canonicalize, find_key, FALLBACK_TOKEN};

/// Object keys probed for a label, in priority order.
pub const LABEL_KEYS: [&str; 3] = ["label", "class", "prediction"];

/// Which extraction strategy produced the canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", content = "key", rename_all = "snake_case")]
pub enum Strategy {
    /// Payload was a bare string.
    Direct,
    /// One of [`LABEL_KEYS`] held a present value.
    Key(&'static str),
    /// First string value of an object with no label key.
    FirstString,
    /// Nothing usable; the fallback token was used.
    Fallback,
}

/// Full trace of how a payload resolved to a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub canonical: String,
    #[serde(flatten)]
    pub strategy: Strategy,
    pub matched_key: Option<&'static str>,
    pub label: ClinicalLabel,
}

/// Truthiness test used when probing label keys: null, `false`, `0` and the
/// empty string count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a label value the way the upstream dashboard's string coercion
/// does: objects collapse to `[object Object]`, arrays join their elements
/// with `,` (null elements render empty).
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => "[object Object]".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => stringify(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Array-index keys (`"0"`, `"17"`, no leading zeros, below 2^32 - 1).
fn index_key(key: &str) -> Option<u32> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|&n| n != u32::MAX)
}

/// Object values in property order: index keys ascending, then the rest
/// in emitted order.
fn values_in_property_order(map: &serde_json::Map<String, Value>) -> Vec<&Value> {
    let mut indexed: Vec<(u32, &Value)> = map
        .iter()
        .filter_map(|(k, v)| index_key(k).map(|n| (n, v)))
        .collect();
    indexed.sort_by_key(|(n, _)| *n);
    indexed
        .into_iter()
        .map(|(_, v)| v)
        .chain(map.iter().filter(|(k, _)| index_key(k).is_none()).map(|(_, v)| v))
        .collect()
}

/// Run the extraction chain, returning the canonical string and the strategy
/// that produced it.
pub fn extract(payload: &Value) -> (String, Strategy) {
    match payload {
        Value::String(s) => (canonicalize(s), Strategy::Direct),
        Value::Object(map) => {
            for key in LABEL_KEYS {
                if let Some(value) = map.get(key).filter(|v| is_present(v)) {
                    return (canonicalize(&stringify(value)), Strategy::Key(key));
                }
            }
            match values_in_property_order(map).into_iter().find_map(Value::as_str) {
                Some(s) => (canonicalize(s), Strategy::FirstString),
                None => (FALLBACK_TOKEN.to_string(), Strategy::Fallback),
            }
        }
        _ => (FALLBACK_TOKEN.to_string(), Strategy::Fallback),
    }
}

/// Resolve a payload to a label without drawing a confidence.
pub fn resolve(payload: &Value) -> Resolution {
    let (canonical, strategy) = extract(payload);
    let matched = find_key(&canonical);
    let label = matched
        .map(|(_, label)| label)
        .unwrap_or(ClinicalLabel::NoTumor);

    debug!(
        canonical = %canonical,
        strategy = ?strategy,
        matched_key = ?matched.map(|(k, _)| k),
        label = %label,
        "normalized prediction"
    );

    Resolution {
        canonical,
        strategy,
        matched_key: matched.map(|(key, _)| key),
        label,
    }
}

/// Build the finding for an already-resolved payload.
pub fn finding_for<C: ConfidenceSource + ?Sized>(
    resolution: &Resolution,
    source: &mut C,
) -> ClinicalFinding {
    ClinicalFinding::new(resolution.label, source.confidence(resolution.label))
}

/// Normalize a raw payload into a finding, drawing confidence from `source`.
pub fn normalize<C: ConfidenceSource + ?Sized>(payload: &Value, source: &mut C) -> ClinicalFinding {
    finding_for(&resolve(payload), source)
}
