//! `cogworld-perception` – kinematic side of the world model.
//!
//! Turns streams of noisy, irregular observations into stable per-entity
//! beliefs and flags what genuinely changed.
//!
//! # Modules
//!
//! - [`temporal`] – [`TemporalCoherenceEngine`][temporal::TemporalCoherenceEngine]:
//!   exponential smoothing, weighted-regression velocity, short-horizon
//!   prediction, confidence decay and kinematic anomaly detection.
//! - [`tracker`] – [`ObjectTracker`][tracker::ObjectTracker]: persistent
//!   identities with occlusion handling and appearance re-identification.
//! - [`change`] – [`ChangeDetector`][change::ChangeDetector]: rolling z-test
//!   change confirmation and least-squares drift analysis.
//! - [`sparse`] – [`SparseUpdateHandler`][sparse::SparseUpdateHandler]:
//!   cadence learning, gap interpolation and observation scheduling.

pub mod change;
pub mod sparse;
pub mod temporal;
pub mod tracker;
