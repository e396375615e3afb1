//! Decision support under uncertainty.

use std::fmt;

use cogworld_types::stats::clamp_unit;
use serde::{Deserialize, Serialize};

use crate::config::ReasonerConfig;

/// Success probability at or above which an action may simply proceed.
const PROCEED_PROBABILITY: f64 = 0.8;
/// Success probability at or above which an action may proceed carefully.
const CAUTION_PROBABILITY: f64 = 0.5;

/// A candidate action to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action: String,
    pub success_probability: f64,
    /// Utility if the action succeeds.
    pub success_value: f64,
    /// Utility if it fails (usually negative).
    pub failure_value: f64,
    /// Belief targets the outcome depends on.
    #[serde(default)]
    pub relevant_targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Proceed,
    ProceedWithCaution,
    GatherMoreInfo,
    Avoid,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recommendation::Proceed => "proceed",
            Recommendation::ProceedWithCaution => "proceed_with_caution",
            Recommendation::GatherMoreInfo => "gather_more_info",
            Recommendation::Avoid => "avoid",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvaluation {
    pub action: String,
    pub expected_value: f64,
    /// Expected value minus the uncertainty penalty.
    pub risk_adjusted_value: f64,
    /// Mean epistemic uncertainty over the relevant targets, in `[0, 1]`.
    pub uncertainty: f64,
    pub recommendation: Recommendation,
    pub rationale: String,
}

/// Score a proposal given the uncertainty of the beliefs it depends on.
pub fn evaluate(proposal: &ActionProposal, uncertainty: f64, config: &ReasonerConfig) -> ActionEvaluation {
    let p = clamp_unit(proposal.success_probability);
    let uncertainty = clamp_unit(uncertainty);
    let expected_value = p * proposal.success_value + (1.0 - p) * proposal.failure_value;
    let stakes = (proposal.success_value - proposal.failure_value).abs();
    let risk_adjusted_value = expected_value - config.risk_aversion * uncertainty * stakes;

    let high = config.high_uncertainty_threshold;
    let (recommendation, rationale) = if uncertainty > high {
        (
            Recommendation::GatherMoreInfo,
            format!("uncertainty {uncertainty:.2} exceeds {high:.2}"),
        )
    } else if p >= PROCEED_PROBABILITY && risk_adjusted_value > 0.0 {
        (
            Recommendation::Proceed,
            format!("p={p:.2} with risk-adjusted value {risk_adjusted_value:.2}"),
        )
    } else if p >= CAUTION_PROBABILITY && risk_adjusted_value > 0.0 {
        (
            Recommendation::ProceedWithCaution,
            format!("moderate p={p:.2}, risk-adjusted value {risk_adjusted_value:.2}"),
        )
    } else if uncertainty > high / 2.0 {
        (
            Recommendation::GatherMoreInfo,
            format!("unfavourable odds (p={p:.2}) but uncertainty {uncertainty:.2} may be reducible"),
        )
    } else {
        (
            Recommendation::Avoid,
            format!("p={p:.2}, risk-adjusted value {risk_adjusted_value:.2}"),
        )
    };

    ActionEvaluation {
        action: proposal.action.clone(),
        expected_value,
        risk_adjusted_value,
        uncertainty,
        recommendation,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(p: f64) -> ActionProposal {
        ActionProposal {
            action: "grab".into(),
            success_probability: p,
            success_value: 10.0,
            failure_value: -5.0,
            relevant_targets: Vec::new(),
        }
    }

    #[test]
    fn confident_favourable_action_proceeds() {
        let eval = evaluate(&proposal(0.9), 0.1, &ReasonerConfig::default());
        assert!((eval.expected_value - 8.5).abs() < 1e-12);
        assert!((eval.risk_adjusted_value - (8.5 - 0.5 * 0.1 * 15.0)).abs() < 1e-12);
        assert_eq!(eval.recommendation, Recommendation::Proceed);
    }

    #[test]
    fn high_uncertainty_always_gathers_information() {
        let eval = evaluate(&proposal(0.99), 0.9, &ReasonerConfig::default());
        assert_eq!(eval.recommendation, Recommendation::GatherMoreInfo);
    }

    #[test]
    fn moderate_odds_proceed_with_caution() {
        let eval = evaluate(&proposal(0.6), 0.1, &ReasonerConfig::default());
        assert_eq!(eval.recommendation, Recommendation::ProceedWithCaution);
    }

    #[test]
    fn poor_odds_avoid_or_investigate() {
        let cfg = ReasonerConfig::default();
        assert_eq!(evaluate(&proposal(0.2), 0.1, &cfg).recommendation, Recommendation::Avoid);
        assert_eq!(
            evaluate(&proposal(0.2), 0.4, &cfg).recommendation,
            Recommendation::GatherMoreInfo
        );
    }
}
