//! Gaussian beliefs over scalar targets.
//!
//! A belief is a single-state Kalman filter with a random-walk process
//! model: updates shrink the variance by the gain, silence inflates it by
//! `process_noise` per second.

use cogworld_types::Timestamp;
use cogworld_types::stats::{self, EPSILON, clamp_unit};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ReasonerConfig;

/// One reading folded into a belief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BeliefObservation {
    pub source_id: String,
    /// Bias-corrected value.
    pub value: f64,
    pub uncertainty: f64,
    pub timestamp: Timestamp,
}

/// Bayesian estimate of one scalar target (e.g. `"wall-1.x"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BeliefState {
    pub target: String,
    pub mean: f64,
    pub variance: f64,
    pub confidence: f64,
    /// `0` right after an update, `1` once `staleness_horizon_ms` has passed.
    pub staleness: f64,
    pub last_updated: Timestamp,
    /// Time up to which decay has been applied.
    pub last_decayed: Timestamp,
    pub update_count: u64,
    /// Readings inside the belief window, oldest first.
    pub observations: Vec<BeliefObservation>,
}

impl BeliefState {
    /// Belief seeded from a first reading.
    pub(crate) fn first(
        target: &str,
        observation: BeliefObservation,
        observed_variance: f64,
        trust: f64,
    ) -> Self {
        let at = observation.timestamp;
        Self {
            target: target.to_string(),
            mean: observation.value,
            variance: observed_variance.max(EPSILON),
            confidence: clamp_unit(trust),
            staleness: 0.0,
            last_updated: at,
            last_decayed: at,
            update_count: 1,
            observations: vec![observation],
        }
    }

    /// Kalman step: `k = P / (P + R)`, `μ += k (z − μ)`, `P = (1 − k) P`.
    pub(crate) fn update(
        &mut self,
        observation: BeliefObservation,
        observed_variance: f64,
        trust: f64,
        config: &ReasonerConfig,
    ) {
        let prior = self.variance.max(0.0);
        let gain = prior / (prior + observed_variance + EPSILON);
        let mean = self.mean + gain * (observation.value - self.mean);
        if mean.is_finite() {
            self.mean = mean;
        }
        self.variance = ((1.0 - gain) * prior).max(EPSILON);
        self.confidence =
            clamp_unit(self.confidence + config.confidence_nudge * (trust - self.confidence));
        self.staleness = 0.0;

        let at = observation.timestamp;
        self.last_updated = self.last_updated.max(at);
        self.last_decayed = self.last_decayed.max(at);
        self.update_count += 1;
        self.observations.push(observation);
        let cutoff = at.plus_millis(-config.belief_window_ms);
        self.observations.retain(|o| o.timestamp >= cutoff);
        let excess = self.observations.len().saturating_sub(config.max_belief_observations);
        self.observations.drain(..excess);
    }

    /// Age the belief to `now`.  A call at or before the last decay is a no-op.
    pub(crate) fn decay(&mut self, now: Timestamp, config: &ReasonerConfig) {
        let dt = now.seconds_since(self.last_decayed);
        if dt <= 0.0 {
            return;
        }
        self.staleness = clamp_unit(
            now.millis_since(self.last_updated) as f64 / config.staleness_horizon_ms as f64,
        );
        self.confidence = clamp_unit(self.confidence * (-config.belief_decay_rate * dt).exp());
        self.variance += config.process_noise * dt;
        self.last_decayed = now;
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// `P(lo ≤ X ≤ hi)` under the belief's normal distribution.
    pub fn probability_in_range(&self, lo: f64, hi: f64) -> f64 {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let sd = self.std_dev();
        clamp_unit(stats::normal_cdf(hi, self.mean, sd) - stats::normal_cdf(lo, self.mean, sd))
    }

    /// Confidence discounted by staleness; `1 − effective` is the belief's
    /// contribution to decision uncertainty.
    pub fn effective_confidence(&self) -> f64 {
        clamp_unit(self.confidence * (1.0 - self.staleness))
    }
}
