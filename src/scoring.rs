//! Origin scoring.
//!
//! The score is a weighted blend of three independent signals:
//!
//! ```text
//! score = 100 * (0.5 * human + 0.3 * temporal + 0.2 * (1 - ai))
//! ```
//!
//! Every signal is clamped to `[0, 1]` before blending (non-finite signals
//! count as zero), so the score always lands in `[0, 100]` whatever the
//! signal source reports.

use crate::work::{Fingerprint, WorkMetadata};

/// Weight of the human-authorship signal.
pub const HUMAN_WEIGHT: f64 = 0.5;
/// Weight of the temporal-consistency signal.
pub const TEMPORAL_WEIGHT: f64 = 0.3;
/// Weight of the inverted machine-generation signal.
pub const AI_WEIGHT: f64 = 0.2;

/// Raw signal readings, nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalSet {
    /// Evidence of human authorship.
    pub human: f64,
    /// Consistency of temporal markers.
    pub temporal: f64,
    /// Evidence of machine generation.
    pub ai: f64,
}

/// Produces [`SignalSet`]s from a fingerprint and its metadata.
pub trait SignalSource: Send + Sync {
    /// Reads the signals for one submission.
    fn signals(&self, fingerprint: &Fingerprint, metadata: &WorkMetadata) -> SignalSet;
}

/// `score(fingerprint, metadata) -> [0, 100]`.
pub trait OriginScorer: Send + Sync {
    /// Scores one submission.
    fn score(&self, fingerprint: &Fingerprint, metadata: &WorkMetadata) -> f64;
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Clamps an externally produced score into `[0, 100]`.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Blends `signals` into the origin score.
pub fn entropy_score(signals: &SignalSet) -> f64 {
    let human = clamp_unit(signals.human);
    let temporal = clamp_unit(signals.temporal);
    let ai = clamp_unit(signals.ai);
    let blended = HUMAN_WEIGHT * human + TEMPORAL_WEIGHT * temporal + AI_WEIGHT * (1.0 - ai);
    clamp_score(blended * 100.0)
}

/// [`OriginScorer`] that applies [`entropy_score`] to a [`SignalSource`].
pub struct WeightedScorer<S> {
    source: S,
}

impl<S: SignalSource> WeightedScorer<S> {
    /// Wraps a signal source.
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: SignalSource> OriginScorer for WeightedScorer<S> {
    fn score(&self, fingerprint: &Fingerprint, metadata: &WorkMetadata) -> f64 {
        entropy_score(&self.source.signals(fingerprint, metadata))
    }
}

/// Signal heuristics computed directly from fingerprint statistics.
///
/// * human: normalised Shannon entropy of the component magnitudes.
/// * temporal: smoothness of neighbouring components, `1 / (1 + n * mean|Δ|)`.
/// * ai: share of neighbouring components that repeat almost exactly.
///
/// Metadata only nudges the temporal signal: a work without any
/// descriptive metadata loses a tenth of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintSignals;

impl SignalSource for FingerprintSignals {
    fn signals(&self, fingerprint: &Fingerprint, metadata: &WorkMetadata) -> SignalSet {
        let values = fingerprint.values();
        if values.is_empty() {
            return SignalSet::default();
        }
        let magnitudes: Vec<f64> = values.iter().map(|v| (*v as f64).abs()).collect();
        let total: f64 = magnitudes.iter().sum();
        let human = if total > 0.0 && values.len() > 1 {
            let entropy: f64 = magnitudes
                .iter()
                .filter(|m| **m > 0.0)
                .map(|m| {
                    let p = m / total;
                    -p * p.ln()
                })
                .sum();
            entropy / (values.len() as f64).ln()
        } else {
            0.0
        };

        let pairs = values.len().saturating_sub(1);
        let (temporal, ai) = if pairs == 0 {
            (1.0, 0.0)
        } else {
            let deltas: Vec<f64> = values
                .windows(2)
                .map(|w| (w[1] as f64 - w[0] as f64).abs())
                .collect();
            let mean_delta = deltas.iter().sum::<f64>() / pairs as f64;
            let repeats = deltas.iter().filter(|d| **d < 1e-4).count();
            (
                1.0 / (1.0 + values.len() as f64 * mean_delta),
                repeats as f64 / pairs as f64,
            )
        };

        let described = !metadata.title.is_empty()
            || !metadata.description.is_empty()
            || !metadata.tags.is_empty();
        let temporal = if described { temporal } else { temporal * 0.9 };

        SignalSet {
            human,
            temporal,
            ai,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_weights() {
        let perfect = SignalSet {
            human: 1.0,
            temporal: 1.0,
            ai: 0.0,
        };
        assert!((entropy_score(&perfect) - 100.0).abs() < 1e-9);
        let worst = SignalSet {
            human: 0.0,
            temporal: 0.0,
            ai: 1.0,
        };
        assert_eq!(entropy_score(&worst), 0.0);
        let mixed = SignalSet {
            human: 0.6,
            temporal: 0.5,
            ai: 0.25,
        };
        assert!((entropy_score(&mixed) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_signals_are_clamped() {
        let wild = SignalSet {
            human: 7.0,
            temporal: -3.0,
            ai: -9.0,
        };
        assert!((entropy_score(&wild) - 70.0).abs() < 1e-9);
        let nan = SignalSet {
            human: f64::NAN,
            temporal: f64::INFINITY,
            ai: f64::NEG_INFINITY,
        };
        assert!((entropy_score(&nan) - 20.0).abs() < 1e-9);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(250.0), 100.0);
    }

    #[test]
    fn fingerprint_signals_stay_in_unit_range() {
        let scorer = WeightedScorer::new(FingerprintSignals);
        let flat = Fingerprint::new(vec![0.25; 4]);
        let spiky = Fingerprint::new(vec![1.0, 0.0, 0.0, 0.0]);
        let meta = WorkMetadata {
            title: "Nocturne".into(),
            ..WorkMetadata::default()
        };
        let flat_signals = FingerprintSignals.signals(&flat, &meta);
        assert!((flat_signals.human - 1.0).abs() < 1e-9);
        assert_eq!(flat_signals.ai, 1.0);
        let spiky_signals = FingerprintSignals.signals(&spiky, &meta);
        assert_eq!(spiky_signals.human, 0.0);
        for fp in [&flat, &spiky] {
            let score = scorer.score(fp, &meta);
            assert!((0.0..=100.0).contains(&score));
        }
    }

    proptest! {
        #[test]
        fn score_always_within_bounds(human in any::<f64>(), temporal in any::<f64>(), ai in any::<f64>()) {
            let score = entropy_score(&SignalSet { human, temporal, ai });
            prop_assert!((0.0..=100.0).contains(&score));
        }

        #[test]
        fn fingerprint_scores_within_bounds(values in proptest::collection::vec(-1.0e6f32..1.0e6f32, 0..64)) {
            let scorer = WeightedScorer::new(FingerprintSignals);
            let score = scorer.score(&Fingerprint::new(values), &WorkMetadata::default());
            prop_assert!((0.0..=100.0).contains(&score));
        }
    }
}
