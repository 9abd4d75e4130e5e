//! Confidence synthesis.
//!
//! The upstream model does not report a usable score, so confidence is drawn
//! uniformly from a fixed per-class range on every normalization. The policy
//! sits behind [`ConfidenceSource`] so a real score can replace it without
//! touching label matching.

use std::ops::Range;

use rand::Rng;

use crate::finding::ClinicalLabel;

/// Range for tumor classes, in percent.
pub const TUMOR_CONFIDENCE_RANGE: Range<f64> = 85.0..95.0;

/// Range for the no-tumor class, in percent.
pub const NO_TUMOR_CONFIDENCE_RANGE: Range<f64> = 90.0..98.0;

/// Half-open range a synthesized confidence for `label` falls in.
pub fn confidence_range(label: ClinicalLabel) -> Range<f64> {
    match label {
        ClinicalLabel::NoTumor => NO_TUMOR_CONFIDENCE_RANGE,
        _ => TUMOR_CONFIDENCE_RANGE,
    }
}

/// Supplies a confidence (percent) for a resolved label.
pub trait ConfidenceSource {
    fn confidence(&mut self, label: ClinicalLabel) -> f64;
}

/// Placeholder policy: uniform draw from [`confidence_range`].
#[derive(Debug, Clone)]
pub struct SynthesizedConfidence<R> {
    rng: R,
}

impl<R: Rng> SynthesizedConfidence<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn into_inner(self) -> R {
        self.rng
    }
}

impl<R: Rng> ConfidenceSource for SynthesizedConfidence<R> {
    fn confidence(&mut self, label: ClinicalLabel) -> f64 {
        self.rng.random_range(confidence_range(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_draws_stay_in_class_range() {
        let mut source = SynthesizedConfidence::new(StdRng::seed_from_u64(7));
        for _ in 0..1000 {
            for label in ClinicalLabel::ALL {
                let c = source.confidence(label);
                assert!(confidence_range(label).contains(&c), "{label}: {c}");
            }
        }
    }

    #[test]
    fn test_draws_are_not_cached() {
        let mut source = SynthesizedConfidence::new(StdRng::seed_from_u64(42));
        let draws: Vec<f64> = (0..16)
            .map(|_| source.confidence(ClinicalLabel::Glioma))
            .collect();
        assert!(draws.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = SynthesizedConfidence::new(StdRng::seed_from_u64(3));
        let mut b = SynthesizedConfidence::new(StdRng::seed_from_u64(3));
        assert_eq!(
            a.confidence(ClinicalLabel::NoTumor),
            b.confidence(ClinicalLabel::NoTumor)
        );
    }

    #[test]
    fn test_borrowed_rng() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut source = SynthesizedConfidence::new(&mut rng);
        let c = source.confidence(ClinicalLabel::Meningioma);
        assert!(TUMOR_CONFIDENCE_RANGE.contains(&c));
    }
}
