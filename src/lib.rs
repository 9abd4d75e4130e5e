//! NeuroScan — clinical interpretation of brain-MRI tumor classifications.
//!
//! Submits an MRI image to a remote classification model and maps whatever
//! comes back onto a fixed four-class taxonomy:
//! - **glioma** (severity High)
//! - **meningioma** (severity Moderate)
//! - **pituitary** (severity Moderate)
//! - **no-tumor** (severity None)
//!
//! Normalization is total: malformed or unrecognized payloads resolve to
//! no-tumor. When the remote model is unreachable, [`classify`] still returns
//! a finding built from a randomly chosen label, tagged as
//! [`FindingSource::Fallback`] so it can be told apart from a model result.
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=neuroscan=debug`).

pub mod confidence;
pub mod finding;
pub mod gateway;
pub mod image;
pub mod normalize;
pub mod server;
pub mod taxonomy;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::confidence::SynthesizedConfidence;
use crate::finding::ClinicalFinding;
use crate::gateway::{ClassifierGateway, GatewayUnavailable};
use crate::image::ImageUpload;

/// Labels a fallback finding is drawn from, in the model's vocabulary.
pub const FALLBACK_LABELS: [&str; 4] = ["glioma", "meningioma", "pituitary", "notumor"];

/// What to do when the gateway is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Substitute a finding for a randomly chosen label.
    #[default]
    Synthesize,
    /// Return the gateway error to the caller.
    Propagate,
}

impl FallbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synthesize => "synthesize",
            Self::Propagate => "propagate",
        }
    }
}

/// Where a finding came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FindingSource {
    /// Normalized from a real model payload.
    Model,
    /// Synthesized because the gateway was unavailable.
    Fallback { reason: String },
}

impl FindingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Fallback { .. } => "fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Result of one classification request.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub finding: ClinicalFinding,
    pub source: FindingSource,
}

/// Normalize a raw payload with synthesized confidence drawn from `rng`.
pub fn normalize<R: Rng + ?Sized>(payload: &Value, rng: &mut R) -> ClinicalFinding {
    normalize::normalize(payload, &mut SynthesizedConfidence::new(rng))
}

/// Build a fallback finding from a uniformly chosen label.
pub fn fallback_finding<R: Rng + ?Sized>(rng: &mut R) -> ClinicalFinding {
    let token = FALLBACK_LABELS[rng.random_range(0..FALLBACK_LABELS.len())];
    normalize(&Value::String(token.to_string()), rng)
}

/// Submit `image` and normalize the result. Never fails: a gateway failure
/// yields a fallback finding.
pub async fn classify<G, R>(gateway: &G, image: &ImageUpload, rng: &mut R) -> Classification
where
    G: ClassifierGateway + ?Sized,
    R: Rng + ?Sized,
{
    match gateway.submit(image).await {
        Ok(payload) => Classification {
            finding: normalize(&payload, rng),
            source: FindingSource::Model,
        },
        Err(e) => {
            let finding = fallback_finding(rng);
            tracing::warn!(
                error = %e,
                label = %finding.label(),
                "classifier unavailable; returning synthesized fallback finding"
            );
            Classification {
                finding,
                source: FindingSource::Fallback {
                    reason: e.to_string(),
                },
            }
        }
    }
}

/// [`classify`] with an explicit [`FallbackPolicy`].
pub async fn classify_with_policy<G, R>(
    gateway: &G,
    image: &ImageUpload,
    policy: FallbackPolicy,
    rng: &mut R,
) -> Result<Classification, GatewayUnavailable>
where
    G: ClassifierGateway + ?Sized,
    R: Rng + ?Sized,
{
    match policy {
        FallbackPolicy::Synthesize => Ok(classify(gateway, image, rng).await),
        FallbackPolicy::Propagate => {
            let payload = gateway.submit(image).await.inspect_err(|e| {
                tracing::warn!(error = %e, "classifier unavailable; propagating error");
            })?;
            Ok(Classification {
                finding: normalize(&payload, rng),
                source: FindingSource::Model,
            })
        }
    }
}
