//! Robust multi-source fusion.
//!
//! 1. **Outlier rejection** – each value is scored against the median by
//!    `|v − median| / scale` with `scale = max(1.4826 · MAD, min uᵢ)`;
//!    scores above the outlier threshold are excluded (but reported).
//! 2. **Weighted mean** – survivors are weighted by `trust / (u² + ε)`; the
//!    fused variance is `Σ wᵢ² uᵢ² / (Σ wᵢ)²`.
//! 3. **Conflict scoring** – every pair of inputs, excluded ones included,
//!    is scored by how many combined-uncertainty units apart it sits:
//!    `d = |a − b| / √(u_a² + u_b²)`, `score = clamp((d − 1) / 2, 0, 1)`.
//!
//! Readings with a non-finite value or uncertainty never contribute; they
//! are listed among the excluded sources.

use cogworld_types::stats::{self, EPSILON, MAD_TO_SIGMA, clamp_unit};
use cogworld_types::{Timestamp, WorldError};
use serde::{Deserialize, Serialize};

use crate::config::ReasonerConfig;

/// One source's reading of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceObservation {
    pub source_id: String,
    pub value: f64,
    /// One-sigma uncertainty claimed by the source.
    pub uncertainty: f64,
    pub timestamp: Timestamp,
}

impl SourceObservation {
    pub fn new(source_id: impl Into<String>, value: f64, uncertainty: f64, timestamp: Timestamp) -> Self {
        Self {
            source_id: source_id.into(),
            value,
            uncertainty: uncertainty.abs(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConflict {
    pub source_a: String,
    pub source_b: String,
    pub difference: f64,
    /// Combined-uncertainty units between the two readings.
    pub separation: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub value: f64,
    pub uncertainty: f64,
    /// Weighted trust of the contributors, discounted by conflict.
    pub confidence: f64,
    pub contributing_sources: Vec<String>,
    pub excluded_sources: Vec<String>,
    /// Worst pairwise conflict score in `[0, 1]`.
    pub conflict_score: f64,
    pub has_conflict: bool,
    /// Pairs scoring above the conflict threshold, worst first.
    pub conflicts: Vec<SourceConflict>,
}

/// Fuse readings of one target.  `trust_of` maps a source id to its current
/// trust level.
///
/// A single reading passes through unchanged.  An empty slice is a caller
/// error.
pub fn fuse(
    observations: &[SourceObservation],
    trust_of: impl Fn(&str) -> f64,
    config: &ReasonerConfig,
) -> Result<FusionResult, WorldError> {
    let (usable, unusable): (Vec<SourceObservation>, Vec<SourceObservation>) = observations
        .iter()
        .map(|o| SourceObservation {
            uncertainty: o.uncertainty.abs(),
            ..o.clone()
        })
        .partition(|o| o.value.is_finite() && o.uncertainty.is_finite());
    if usable.is_empty() {
        return Err(WorldError::EmptyFusion);
    }
    let unusable: Vec<String> = unusable.into_iter().map(|o| o.source_id).collect();

    if let [only] = usable.as_slice() {
        return Ok(FusionResult {
            value: only.value,
            uncertainty: only.uncertainty,
            confidence: clamp_unit(trust_of(&only.source_id)),
            contributing_sources: vec![only.source_id.clone()],
            excluded_sources: unusable,
            conflict_score: 0.0,
            has_conflict: false,
            conflicts: Vec::new(),
        });
    }

    // Outlier rejection around the median.
    let values: Vec<f64> = usable.iter().map(|o| o.value).collect();
    let median = stats::median(&values).unwrap_or(0.0);
    let mad = stats::mad(&values, median).unwrap_or(0.0);
    let min_uncertainty = usable
        .iter()
        .map(|o| o.uncertainty)
        .fold(f64::INFINITY, f64::min);
    let scale = (MAD_TO_SIGMA * mad).max(min_uncertainty).max(EPSILON);

    let (mut kept, mut excluded): (Vec<&SourceObservation>, Vec<&SourceObservation>) = usable
        .iter()
        .partition(|o| (o.value - median).abs() / scale <= config.outlier_threshold);
    if kept.is_empty() {
        kept = std::mem::take(&mut excluded);
    }

    // Inverse-variance weighted mean scaled by trust.
    let weighted: Vec<(&SourceObservation, f64, f64)> = kept
        .iter()
        .map(|o| {
            let trust = clamp_unit(trust_of(&o.source_id));
            (*o, trust, trust.max(EPSILON) / (o.uncertainty.powi(2) + EPSILON))
        })
        .collect();
    let w_sum: f64 = weighted.iter().map(|(_, _, w)| w).sum();
    let value = weighted.iter().map(|(o, _, w)| w * o.value).sum::<f64>() / w_sum;
    let variance = weighted
        .iter()
        .map(|(o, _, w)| w * w * o.uncertainty.powi(2))
        .sum::<f64>()
        / (w_sum * w_sum);
    let mean_trust = weighted.iter().map(|(_, t, w)| t * w).sum::<f64>() / w_sum;

    // Pairwise conflicts across every input.
    let mut conflict_score: f64 = 0.0;
    let mut conflicts = Vec::new();
    for (i, a) in usable.iter().enumerate() {
        for b in &usable[i + 1..] {
            let difference = (a.value - b.value).abs();
            let combined = (a.uncertainty.powi(2) + b.uncertainty.powi(2)).sqrt().max(EPSILON);
            let separation = difference / combined;
            let score = ((separation - 1.0) / 2.0).clamp(0.0, 1.0);
            conflict_score = conflict_score.max(score);
            if score > config.conflict_threshold {
                conflicts.push(SourceConflict {
                    source_a: a.source_id.clone(),
                    source_b: b.source_id.clone(),
                    difference,
                    separation,
                    score,
                });
            }
        }
    }
    conflicts.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.separation.total_cmp(&a.separation)));

    Ok(FusionResult {
        value,
        uncertainty: variance.max(0.0).sqrt(),
        confidence: clamp_unit(mean_trust * (1.0 - 0.5 * conflict_score)),
        contributing_sources: kept.iter().map(|o| o.source_id.clone()).collect(),
        excluded_sources: excluded
            .iter()
            .map(|o| o.source_id.clone())
            .chain(unusable)
            .collect(),
        conflict_score,
        has_conflict: conflict_score > config.conflict_threshold,
        conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(source: &str, value: f64, u: f64) -> SourceObservation {
        SourceObservation::new(source, value, u, Timestamp(0))
    }

    fn even_trust(_: &str) -> f64 {
        0.5
    }

    #[test]
    fn empty_input_is_an_error() {
        let cfg = ReasonerConfig::default();
        assert_eq!(fuse(&[], even_trust, &cfg), Err(WorldError::EmptyFusion));
    }

    #[test]
    fn single_input_passes_through() {
        let cfg = ReasonerConfig::default();
        let result = fuse(&[obs("a", 3.25, 0.7)], even_trust, &cfg).unwrap();
        assert_eq!(result.value, 3.25);
        assert_eq!(result.uncertainty, 0.7);
        assert!(!result.has_conflict);
        assert_eq!(result.contributing_sources, vec!["a".to_string()]);
    }

    #[test]
    fn agreeing_sources_tighten_the_estimate() {
        let cfg = ReasonerConfig::default();
        let result = fuse(&[obs("a", 20.0, 0.5), obs("b", 20.3, 0.5)], even_trust, &cfg).unwrap();
        assert!((result.value - 20.15).abs() < 1e-9);
        assert!(result.uncertainty < 0.5);
        assert!(!result.has_conflict);
        assert!(result.excluded_sources.is_empty());
    }

    #[test]
    fn wild_source_is_excluded_and_flagged() {
        let cfg = ReasonerConfig::default();
        let inputs = [obs("a", 20.0, 0.5), obs("b", 20.3, 0.5), obs("c", 45.0, 0.5)];
        let result = fuse(&inputs, even_trust, &cfg).unwrap();
        assert_eq!(result.excluded_sources, vec!["c".to_string()]);
        assert!((result.value - 20.15).abs() < 1e-9);
        assert!(result.has_conflict);
        assert_eq!(result.conflict_score, 1.0);
        assert!(result.conflicts.iter().all(|c| c.source_a == "c" || c.source_b == "c"));
    }

    #[test]
    fn trusted_source_dominates() {
        let cfg = ReasonerConfig::default();
        let trust = |id: &str| if id == "good" { 0.9 } else { 0.1 };
        let result = fuse(&[obs("good", 10.0, 0.5), obs("poor", 11.0, 0.5)], trust, &cfg).unwrap();
        assert!((result.value - 10.1).abs() < 1e-9);
    }

    #[test]
    fn zero_uncertainty_does_not_produce_nan() {
        let cfg = ReasonerConfig::default();
        let result = fuse(&[obs("a", 1.0, 0.0), obs("b", 1.0, 0.0)], even_trust, &cfg).unwrap();
        assert!(result.value.is_finite());
        assert!(result.uncertainty.is_finite());
        assert!(!result.has_conflict);
    }

    // ── non-finite inputs ───────────────────────────────────────────────────

    #[test]
    fn infinite_uncertainty_is_excluded_not_trusted() {
        let cfg = ReasonerConfig::default();
        let inputs = [obs("a", 20.0, 0.5), obs("b", 20.1, f64::INFINITY)];
        let result = fuse(&inputs, even_trust, &cfg).unwrap();
        assert_eq!(result.value, 20.0);
        assert_eq!(result.uncertainty, 0.5);
        assert_eq!(result.contributing_sources, vec!["a".to_string()]);
        assert_eq!(result.excluded_sources, vec!["b".to_string()]);
    }

    #[test]
    fn nan_uncertainty_does_not_poison_the_fusion() {
        let cfg = ReasonerConfig::default();
        let nan = SourceObservation {
            source_id: "b".into(),
            value: 20.1,
            uncertainty: f64::NAN,
            timestamp: Timestamp(0),
        };
        let inputs = [obs("a", 20.0, 0.5), nan, obs("c", 20.3, 0.5)];
        let result = fuse(&inputs, even_trust, &cfg).unwrap();
        assert!((result.value - 20.15).abs() < 1e-9);
        assert!(result.uncertainty.is_finite());
        assert!(result.confidence.is_finite());
        assert_eq!(result.excluded_sources, vec!["b".to_string()]);
    }

    #[test]
    fn only_unusable_readings_is_an_error() {
        let cfg = ReasonerConfig::default();
        let inputs = [obs("a", f64::NAN, 0.5), obs("b", 1.0, f64::INFINITY)];
        assert_eq!(fuse(&inputs, even_trust, &cfg), Err(WorldError::EmptyFusion));
    }
}
