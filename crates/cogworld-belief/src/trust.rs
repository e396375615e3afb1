//! Online source trust calibration.
//!
//! Every `(observed, actual)` pair updates a source's error statistics with a
//! decaying learning rate `η = 1 / min(n, 100)`, so early evidence moves the
//! estimates quickly and later evidence settles into a 100-sample moving
//! average:
//!
//! ```text
//! bias      += η · (e − bias)
//! |e| mean  += η · (|e| − mean_error)
//! variance  += η · ((e − bias)² − variance)
//! ```
//!
//! Reliability is the fraction of observations whose error stayed within the
//! uncertainty the source itself claimed.  Trust then moves towards
//! `reliability × max_trust`, unless the normalised error `|e| / u` exceeds
//! the outlier threshold, in which case trust is cut by a fixed penalty.

use cogworld_types::Timestamp;
use cogworld_types::stats::{EPSILON, clamp_unit};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ReasonerConfig;

/// Learning-rate horizon for the running error statistics.
const MAX_LEARNING_HORIZON: u64 = 100;

/// Calibrated reliability of one information source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceTrust {
    pub source_id: String,
    pub trust_level: f64,
    /// Fraction of observations within the source's claimed uncertainty.
    pub reliability: f64,
    /// Running mean of the absolute error.
    pub mean_error: f64,
    pub error_variance: f64,
    /// Running mean of the signed error; subtracted from future readings.
    pub bias_estimate: f64,
    pub observation_count: u64,
    pub within_count: u64,
    pub outlier_count: u64,
    pub is_trusted: bool,
    pub last_calibrated: Option<Timestamp>,
}

impl SourceTrust {
    pub fn new(source_id: impl Into<String>, trust: f64, config: &ReasonerConfig) -> Self {
        let trust_level = config.clamp_trust(trust);
        Self {
            source_id: source_id.into(),
            trust_level,
            reliability: 0.5,
            mean_error: 0.0,
            error_variance: 0.0,
            bias_estimate: 0.0,
            observation_count: 0,
            within_count: 0,
            outlier_count: 0,
            is_trusted: trust_level >= config.min_trust_threshold,
            last_calibrated: None,
        }
    }

    /// Fold one calibration pair into the statistics.  Returns `true` when
    /// the observation was treated as an outlier.
    pub fn calibrate(
        &mut self,
        observed: f64,
        actual: f64,
        expected_uncertainty: f64,
        at: Option<Timestamp>,
        config: &ReasonerConfig,
    ) -> bool {
        let error = observed - actual;
        if !error.is_finite() || !expected_uncertainty.is_finite() {
            return false;
        }
        let uncertainty = expected_uncertainty.abs();

        self.observation_count += 1;
        let eta = 1.0 / self.observation_count.min(MAX_LEARNING_HORIZON) as f64;
        self.bias_estimate += eta * (error - self.bias_estimate);
        self.mean_error += eta * (error.abs() - self.mean_error);
        let centred = (error - self.bias_estimate).powi(2);
        self.error_variance = (self.error_variance + eta * (centred - self.error_variance)).max(0.0);

        if error.abs() <= uncertainty {
            self.within_count += 1;
        }
        self.reliability = clamp_unit(self.within_count as f64 / self.observation_count as f64);

        let normalised = error.abs() / (uncertainty + EPSILON);
        let outlier = normalised > config.outlier_threshold;
        let trust = if outlier {
            self.outlier_count += 1;
            self.trust_level - config.outlier_penalty
        } else {
            let target = self.reliability * config.max_trust;
            self.trust_level + config.learning_rate * (target - self.trust_level)
        };
        self.trust_level = config.clamp_trust(trust);
        self.is_trusted = self.trust_level >= config.min_trust_threshold;
        if at.is_some() {
            self.last_calibrated = at;
        }
        outlier
    }
}

/// Per-source outcome of one ground-truth calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub source_id: String,
    pub observed: f64,
    pub error: f64,
    pub trust_before: f64,
    pub trust_after: f64,
    pub outlier: bool,
}

/// Result of [`UncertaintyReasoner::calibrate_sources`][crate::UncertaintyReasoner::calibrate_sources].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub target: String,
    pub ground_truth: f64,
    pub entries: Vec<CalibrationEntry>,
}

impl CalibrationReport {
    /// Source with the smallest absolute error.
    pub fn best_source(&self) -> Option<&CalibrationEntry> {
        self.entries
            .iter()
            .min_by(|a, b| a.error.abs().total_cmp(&b.error.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ReasonerConfig {
        ReasonerConfig::default()
    }

    #[test]
    fn new_source_uses_initial_statistics() {
        let trust = SourceTrust::new("lidar", 0.5, &cfg());
        assert_eq!(trust.reliability, 0.5);
        assert_eq!(trust.observation_count, 0);
        assert!(trust.is_trusted);
    }

    #[test]
    fn accurate_source_gains_trust_monotonically() {
        let config = cfg();
        let mut trust = SourceTrust::new("lidar", 0.5, &config);
        let mut last = trust.trust_level;
        for i in 0..60 {
            let noise = if i % 2 == 0 { 0.05 } else { -0.05 };
            assert!(!trust.calibrate(10.0 + noise, 10.0, 0.5, None, &config));
            assert!(trust.trust_level >= last);
            last = trust.trust_level;
        }
        assert!(trust.trust_level > 0.99);
        assert_eq!(trust.reliability, 1.0);
        assert!(trust.bias_estimate.abs() < 0.01);
    }

    #[test]
    fn outlier_costs_fixed_penalty() {
        let config = cfg();
        let mut trust = SourceTrust::new("cam", 0.8, &config);
        assert!(trust.calibrate(12.0, 10.0, 0.5, None, &config));
        assert!((trust.trust_level - 0.7).abs() < 1e-12);
        assert_eq!(trust.outlier_count, 1);
    }

    #[test]
    fn persistent_large_error_loses_trust() {
        let config = cfg();
        let mut trust = SourceTrust::new("cam", 0.5, &config);
        for _ in 0..50 {
            trust.calibrate(22.0, 20.0, 0.5, None, &config);
        }
        assert!(trust.trust_level < config.min_trust_threshold);
        assert!(!trust.is_trusted);
        assert_eq!(trust.trust_level, config.trust_floor);
        assert!((trust.mean_error - 2.0).abs() < 1e-9);
        assert!((trust.bias_estimate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn moderate_error_reduces_reliability_without_penalty() {
        let config = cfg();
        let mut trust = SourceTrust::new("sonar", 0.5, &config);
        trust.calibrate(11.0, 10.0, 0.5, None, &config);
        assert_eq!(trust.reliability, 0.0);
        assert_eq!(trust.outlier_count, 0);
        assert!((trust.trust_level - 0.45).abs() < 1e-12);
    }

    #[test]
    fn non_finite_pairs_are_ignored() {
        let config = cfg();
        let mut trust = SourceTrust::new("sonar", 0.5, &config);
        assert!(!trust.calibrate(f64::NAN, 1.0, 0.5, None, &config));
        assert!(!trust.calibrate(1.0, 1.0, f64::INFINITY, None, &config));
        assert!(!trust.calibrate(1.0, 1.0, f64::NAN, None, &config));
        assert_eq!(trust.observation_count, 0);
    }

    #[test]
    fn best_source_has_smallest_error() {
        let report = CalibrationReport {
            target: "t".into(),
            ground_truth: 1.0,
            entries: vec![
                CalibrationEntry {
                    source_id: "a".into(),
                    observed: 1.5,
                    error: 0.5,
                    trust_before: 0.5,
                    trust_after: 0.5,
                    outlier: false,
                },
                CalibrationEntry {
                    source_id: "b".into(),
                    observed: 0.9,
                    error: -0.1,
                    trust_before: 0.5,
                    trust_after: 0.55,
                    outlier: false,
                },
            ],
        };
        assert_eq!(report.best_source().unwrap().source_id, "b");
    }
}
