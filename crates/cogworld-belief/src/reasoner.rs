//! The [`UncertaintyReasoner`] facade: one registry of source trust and one
//! of target beliefs, tied together by the calibration, update, fusion and
//! decision operations.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use cogworld_types::stats::EPSILON;
use cogworld_types::{Timestamp, WorldError};
use tracing::{debug, info, warn};

use crate::belief::{BeliefObservation, BeliefState};
use crate::config::ReasonerConfig;
use crate::decision::{self, ActionEvaluation, ActionProposal};
use crate::fusion::{self, FusionResult, SourceObservation};
use crate::trust::{CalibrationEntry, CalibrationReport, SourceTrust};

/// Trust-calibrated Bayesian belief keeper.
///
/// # Example
///
/// ```rust
/// use cogworld_belief::UncertaintyReasoner;
/// use cogworld_types::Timestamp;
///
/// let mut reasoner = UncertaintyReasoner::default();
/// let belief = reasoner
///     .update_belief("door.angle", "camera_vision", 42.0, 1.0, Timestamp(0))
///     .unwrap();
/// assert_eq!(belief.mean, 42.0);
/// assert_eq!(belief.staleness, 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct UncertaintyReasoner {
    config: ReasonerConfig,
    sources: BTreeMap<String, SourceTrust>,
    beliefs: BTreeMap<String, BeliefState>,
}

impl Default for UncertaintyReasoner {
    fn default() -> Self {
        Self {
            config: ReasonerConfig::default(),
            sources: BTreeMap::new(),
            beliefs: BTreeMap::new(),
        }
    }
}

impl UncertaintyReasoner {
    pub fn new(config: ReasonerConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            config,
            sources: BTreeMap::new(),
            beliefs: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    // ── sources ─────────────────────────────────────────────────────────────

    /// Register `source_id`, or reset the trust of an existing source when an
    /// explicit `initial_trust` is given.
    pub fn register_source(&mut self, source_id: &str, initial_trust: Option<f64>) -> &SourceTrust {
        let trust = initial_trust.unwrap_or(self.config.initial_trust);
        let config = &self.config;
        let entry = self
            .sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceTrust::new(source_id, trust, config));
        if let Some(explicit) = initial_trust {
            entry.trust_level = config.clamp_trust(explicit);
            entry.is_trusted = entry.trust_level >= config.min_trust_threshold;
        }
        entry
    }

    fn source_mut(&mut self, source_id: &str) -> &mut SourceTrust {
        let config = &self.config;
        self.sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceTrust::new(source_id, config.initial_trust, config))
    }

    /// Calibrate a source against one known-true value.
    pub fn update_source_trust(
        &mut self,
        source_id: &str,
        observed: f64,
        actual: f64,
        expected_uncertainty: f64,
    ) -> SourceTrust {
        let config = self.config.clone();
        let source = self.source_mut(source_id);
        let before = source.trust_level;
        let outlier = source.calibrate(observed, actual, expected_uncertainty, None, &config);
        if outlier {
            warn!(
                source = source_id,
                observed,
                actual,
                trust = source.trust_level,
                "source outlier penalised"
            );
        } else {
            debug!(source = source_id, before, after = source.trust_level, "source trust updated");
        }
        source.clone()
    }

    /// Calibrate every source that reported `target` against `ground_truth`.
    pub fn calibrate_sources(
        &mut self,
        target: &str,
        ground_truth: f64,
        observations: &[SourceObservation],
    ) -> CalibrationReport {
        let config = self.config.clone();
        let mut entries = Vec::with_capacity(observations.len());
        for obs in observations {
            let source = self.source_mut(&obs.source_id);
            let trust_before = source.trust_level;
            let outlier = source.calibrate(
                obs.value,
                ground_truth,
                obs.uncertainty,
                Some(obs.timestamp),
                &config,
            );
            entries.push(CalibrationEntry {
                source_id: obs.source_id.clone(),
                observed: obs.value,
                error: obs.value - ground_truth,
                trust_before,
                trust_after: source.trust_level,
                outlier,
            });
        }
        info!(belief_target = target, ground_truth, sources = entries.len(), "sources calibrated");
        CalibrationReport {
            target: target.to_string(),
            ground_truth,
            entries,
        }
    }

    pub fn get_source_trust(&self, source_id: &str) -> Option<&SourceTrust> {
        self.sources.get(source_id)
    }

    /// Current trust of `source_id`; unknown sources get `initial_trust`.
    pub fn trust_of(&self, source_id: &str) -> f64 {
        self.sources
            .get(source_id)
            .map(|s| s.trust_level)
            .unwrap_or(self.config.initial_trust)
    }

    /// Ids of trusted sources, sorted.
    pub fn trusted_sources(&self) -> Vec<&str> {
        self.sources
            .values()
            .filter(|s| s.is_trusted)
            .map(|s| s.source_id.as_str())
            .collect()
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceTrust> {
        self.sources.values()
    }

    // ── beliefs ─────────────────────────────────────────────────────────────

    /// Fold one reading into the belief about `target`.
    ///
    /// The value is bias-corrected with the source's learned bias and its
    /// uncertainty inflated by `1 / √trust` before the Kalman step.  Returns
    /// `None` (and changes nothing) for a non-finite value or uncertainty.
    pub fn update_belief(
        &mut self,
        target: &str,
        source_id: &str,
        value: f64,
        uncertainty: f64,
        at: Timestamp,
    ) -> Option<&BeliefState> {
        if !value.is_finite() || !uncertainty.is_finite() {
            warn!(belief_target = target, source = source_id, "non-finite belief update ignored");
            return None;
        }
        let uncertainty = uncertainty.abs();
        let (bias, trust) = {
            let source = self.source_mut(source_id);
            (source.bias_estimate, source.trust_level)
        };
        let corrected = value - bias;
        let inflated = uncertainty / trust.max(self.config.trust_floor).max(EPSILON).sqrt();
        let observed_variance = inflated.powi(2).max(EPSILON);
        let observation = BeliefObservation {
            source_id: source_id.to_string(),
            value: corrected,
            uncertainty: inflated,
            timestamp: at,
        };

        let config = &self.config;
        let belief = match self.beliefs.entry(target.to_string()) {
            Entry::Occupied(entry) => {
                let belief = entry.into_mut();
                belief.update(observation, observed_variance, trust, config);
                belief
            }
            Entry::Vacant(entry) => {
                debug!(belief_target = target, source = source_id, "belief created");
                entry.insert(BeliefState::first(target, observation, observed_variance, trust))
            }
        };
        Some(&*belief)
    }

    /// Age every belief to `now`.
    pub fn decay_beliefs(&mut self, now: Timestamp) {
        for belief in self.beliefs.values_mut() {
            belief.decay(now, &self.config);
        }
    }

    pub fn get_belief(&self, target: &str) -> Option<&BeliefState> {
        self.beliefs.get(target)
    }

    /// Beliefs whose target starts with `prefix`, in target order.
    pub fn beliefs_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a BeliefState> {
        self.beliefs
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(_, b)| b)
    }

    /// Drop every belief whose target starts with `prefix`.
    pub fn forget_beliefs(&mut self, prefix: &str) -> usize {
        let before = self.beliefs.len();
        self.beliefs.retain(|k, _| !k.starts_with(prefix));
        before - self.beliefs.len()
    }

    pub fn remove_belief(&mut self, target: &str) -> Option<BeliefState> {
        self.beliefs.remove(target)
    }

    pub fn beliefs(&self) -> impl Iterator<Item = &BeliefState> {
        self.beliefs.values()
    }

    /// `P(lo ≤ target ≤ hi)`; `None` for unknown targets.
    pub fn estimate_probability_in_range(&self, target: &str, lo: f64, hi: f64) -> Option<f64> {
        self.beliefs.get(target).map(|b| b.probability_in_range(lo, hi))
    }

    // ── fusion & decisions ──────────────────────────────────────────────────

    /// Fuse simultaneous readings using the current trust of each source.
    pub fn fuse_observations(&self, observations: &[SourceObservation]) -> Result<FusionResult, WorldError> {
        let result = fusion::fuse(observations, |id| self.trust_of(id), &self.config)?;
        if result.has_conflict {
            warn!(
                conflict = result.conflict_score,
                excluded = ?result.excluded_sources,
                "conflicting sources during fusion"
            );
        }
        Ok(result)
    }

    /// Mean of `1 − confidence · (1 − staleness)` over `targets`; unknown
    /// targets count as fully uncertain, an empty list as certain.
    pub fn uncertainty_of(&self, targets: &[String]) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let total: f64 = targets
            .iter()
            .map(|t| match self.beliefs.get(t) {
                Some(b) => 1.0 - b.effective_confidence(),
                None => 1.0,
            })
            .sum();
        total / targets.len() as f64
    }

    pub fn evaluate_action(&self, proposal: &ActionProposal) -> ActionEvaluation {
        let uncertainty = self.uncertainty_of(&proposal.relevant_targets);
        let evaluation = decision::evaluate(proposal, uncertainty, &self.config);
        debug!(
            action = %proposal.action,
            recommendation = %evaluation.recommendation,
            uncertainty,
            "action evaluated"
        );
        evaluation
    }

    pub fn summary(&self) -> String {
        let trusted = self.sources.values().filter(|s| s.is_trusted).count();
        let mut out = format!(
            "Uncertainty: {} beliefs, {} sources ({} trusted)\n",
            self.beliefs.len(),
            self.sources.len(),
            trusted
        );
        for source in self.sources.values() {
            out.push_str(&format!(
                "- {}: trust {:.2} reliability {:.2} bias {:+.3}{}\n",
                source.source_id,
                source.trust_level,
                source.reliability,
                source.bias_estimate,
                if source.is_trusted { "" } else { " [untrusted]" }
            ));
        }
        out
    }
}
