//! `cogworld-belief` – the Uncertainty Reasoner.
//!
//! Keeps calibrated trust in every information source and Gaussian beliefs
//! over scalar targets, and uses both to fuse conflicting readings and to
//! judge whether an action is safe to take.
//!
//! # Modules
//!
//! - [`trust`] – [`SourceTrust`]: online error statistics, reliability and
//!   outlier-penalised trust per source.
//! - [`belief`] – [`BeliefState`]: single-state Kalman belief with staleness
//!   and confidence decay.
//! - [`fusion`] – MAD-robust, trust-weighted fusion with pairwise conflict
//!   scoring.
//! - [`decision`] – expected and risk-adjusted value of a proposed action.
//! - [`reasoner`] – [`UncertaintyReasoner`], the facade tying them together.

pub mod belief;
pub mod config;
pub mod decision;
pub mod fusion;
pub mod reasoner;
pub mod trust;

pub use belief::{BeliefObservation, BeliefState};
pub use config::ReasonerConfig;
pub use decision::{ActionEvaluation, ActionProposal, Recommendation};
pub use fusion::{FusionResult, SourceConflict, SourceObservation};
pub use reasoner::UncertaintyReasoner;
pub use trust::{CalibrationEntry, CalibrationReport, SourceTrust};
