//! Tuning parameters shared by trust calibration, belief updates, fusion and
//! decision support.

use cogworld_types::{WorldError, ensure_non_negative, ensure_positive, ensure_range};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Trust assigned to a source on first sight.  Default `0.5`.
    pub initial_trust: f64,
    /// Default `1.0`.
    pub max_trust: f64,
    /// Trust never drops below this, so a penalised source can recover.
    /// Default `0.01`.
    pub trust_floor: f64,
    /// Trust at or above which a source counts as trusted.  Default `0.3`.
    pub min_trust_threshold: f64,
    /// Step towards `reliability × max_trust` per calibration.  Default `0.1`.
    pub learning_rate: f64,
    /// Normalised error above which an observation is an outlier, for trust
    /// calibration as well as for MAD-based fusion.  Default `3.0`.
    pub outlier_threshold: f64,
    /// Trust removed per outlier.  Default `0.1`.
    pub outlier_penalty: f64,
    /// Observations kept per belief (ms).  Default `60000`.
    pub belief_window_ms: i64,
    /// Silence after which a belief counts as fully stale (ms).  Default `30000`.
    pub staleness_horizon_ms: i64,
    /// Belief confidence decay rate (1/s).  Default `0.05`.
    pub belief_decay_rate: f64,
    /// Variance added per second of silence.  Default `0.01`.
    pub process_noise: f64,
    /// Fraction of the gap to source trust closed per update.  Default `0.2`.
    pub confidence_nudge: f64,
    /// Pairwise conflict score above which fusion reports a conflict.
    /// Default `0.5`.
    pub conflict_threshold: f64,
    /// Proposal uncertainty above which decisions always gather more
    /// information.  Default `0.6`.
    pub high_uncertainty_threshold: f64,
    /// Weight of the uncertainty penalty in risk-adjusted value.  Default `0.5`.
    pub risk_aversion: f64,
    /// Hard cap on observations kept per belief.  Default `100`.
    pub max_belief_observations: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            initial_trust: 0.5,
            max_trust: 1.0,
            trust_floor: 0.01,
            min_trust_threshold: 0.3,
            learning_rate: 0.1,
            outlier_threshold: 3.0,
            outlier_penalty: 0.1,
            belief_window_ms: 60_000,
            staleness_horizon_ms: 30_000,
            belief_decay_rate: 0.05,
            process_noise: 0.01,
            confidence_nudge: 0.2,
            conflict_threshold: 0.5,
            high_uncertainty_threshold: 0.6,
            risk_aversion: 0.5,
            max_belief_observations: 100,
        }
    }
}

impl ReasonerConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        ensure_range("reasoner.max_trust", self.max_trust, 0.0, 1.0)?;
        ensure_range("reasoner.trust_floor", self.trust_floor, 0.0, self.max_trust)?;
        ensure_range(
            "reasoner.initial_trust",
            self.initial_trust,
            self.trust_floor,
            self.max_trust,
        )?;
        ensure_range("reasoner.min_trust_threshold", self.min_trust_threshold, 0.0, 1.0)?;
        ensure_range("reasoner.learning_rate", self.learning_rate, 0.0, 1.0)?;
        ensure_positive("reasoner.outlier_threshold", self.outlier_threshold)?;
        ensure_non_negative("reasoner.outlier_penalty", self.outlier_penalty)?;
        ensure_positive("reasoner.belief_window_ms", self.belief_window_ms as f64)?;
        ensure_positive("reasoner.staleness_horizon_ms", self.staleness_horizon_ms as f64)?;
        ensure_non_negative("reasoner.belief_decay_rate", self.belief_decay_rate)?;
        ensure_non_negative("reasoner.process_noise", self.process_noise)?;
        ensure_range("reasoner.confidence_nudge", self.confidence_nudge, 0.0, 1.0)?;
        ensure_range("reasoner.conflict_threshold", self.conflict_threshold, 0.0, 1.0)?;
        ensure_range(
            "reasoner.high_uncertainty_threshold",
            self.high_uncertainty_threshold,
            0.0,
            1.0,
        )?;
        ensure_non_negative("reasoner.risk_aversion", self.risk_aversion)?;
        ensure_positive("reasoner.max_belief_observations", self.max_belief_observations as f64)
    }

    /// Clamp a trust value into `[trust_floor, max_trust]`.
    pub fn clamp_trust(&self, trust: f64) -> f64 {
        if trust.is_nan() {
            return self.trust_floor;
        }
        trust.clamp(self.trust_floor, self.max_trust)
    }
}
