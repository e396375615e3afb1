//! Change Detector.
//!
//! Separates genuine change from sensor drift, per `(entity, property)`.
//!
//! Every property keeps a rolling baseline of its last accepted samples.
//! A new sample is tested against it:
//!
//! ```text
//! z = |v − μ| / max(σ, min_std)
//! ```
//!
//! A significant sample (`z > z_threshold`) does not fire on its own; it
//! opens a *pending* candidate.  Only `min_persistence` consecutive
//! significant samples on the same side of the baseline confirm a change,
//! after which the baseline is re-seeded from the pending samples.  A quiet
//! sample cancels the candidate, so single-sample spikes are never reported.
//!
//! Slow systematic movement stays inside the rolling baseline and is
//! reported instead by [`ChangeDetector::analyze_drift`], which fits a
//! least-squares trend over the baseline.

use std::collections::BTreeMap;
use std::fmt;

use cogworld_types::stats::{self, EPSILON};
use cogworld_types::{
    BoundedLog, StateVector, Timestamp, WorldError, ensure_non_negative, ensure_positive,
    ensure_range,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    /// Accepted samples kept per property.  Default `20`.
    pub baseline_window: usize,
    /// Samples required before testing starts.  Default `5`.
    pub min_baseline_samples: usize,
    /// Default `3.0`.
    pub z_threshold: f64,
    /// Floor on the baseline spread, so a perfectly flat history does not
    /// turn every rounding error into a change.  Default `0.01`.
    pub min_std: f64,
    /// Consecutive significant samples needed to confirm.  Default `3`.
    pub min_persistence: usize,
    /// Default `0.6`.
    pub drift_min_r_squared: f64,
    /// Units per second.  Default `0.001`.
    pub drift_min_rate: f64,
    /// Change events retained.  Default `200`.
    pub max_events: usize,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            baseline_window: 20,
            min_baseline_samples: 5,
            z_threshold: 3.0,
            min_std: 0.01,
            min_persistence: 3,
            drift_min_r_squared: 0.6,
            drift_min_rate: 0.001,
            max_events: 200,
        }
    }
}

impl ChangeConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        ensure_range(
            "change.min_baseline_samples",
            self.min_baseline_samples as f64,
            2.0,
            self.baseline_window as f64,
        )?;
        ensure_positive("change.z_threshold", self.z_threshold)?;
        ensure_positive("change.min_std", self.min_std)?;
        ensure_positive("change.min_persistence", self.min_persistence as f64)?;
        ensure_range("change.drift_min_r_squared", self.drift_min_r_squared, 0.0, 1.0)?;
        ensure_non_negative("change.drift_min_rate", self.drift_min_rate)?;
        ensure_positive("change.max_events", self.max_events as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Appearance,
    Disappearance,
    /// A positional field (`x`, `y`, `z`) shifted.
    Movement,
    /// Any other property shifted.
    StateChange,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Appearance => "appearance",
            ChangeKind::Disappearance => "disappearance",
            ChangeKind::Movement => "movement",
            ChangeKind::StateChange => "state_change",
        })
    }
}

/// A confirmed semantic change.  Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub kind: ChangeKind,
    pub entity_id: String,
    /// `None` for appearance/disappearance.
    pub property: Option<String>,
    pub timestamp: Timestamp,
    /// Baseline mean before the change.
    pub previous: Option<f64>,
    pub current: Option<f64>,
    /// Mean z-score of the confirming samples over `z_threshold`.
    pub significance: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Slow systematic trend of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAnalysis {
    pub entity_id: String,
    pub property: String,
    /// Units per second.
    pub drift_rate: f64,
    /// Trend change across the baseline span.
    pub total_drift: f64,
    pub r_squared: f64,
    pub sample_count: usize,
    pub is_drifting: bool,
    pub direction: DriftDirection,
}

#[derive(Debug, Clone)]
struct Baseline {
    samples: BoundedLog<(Timestamp, f64)>,
    pending: Vec<(Timestamp, f64, f64)>,
    pending_above: bool,
}

impl Baseline {
    fn new(window: usize) -> Self {
        Self {
            samples: BoundedLog::new(window),
            pending: Vec::new(),
            pending_above: false,
        }
    }

    fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.1).collect()
    }
}

fn is_positional(property: &str) -> bool {
    matches!(property, "x" | "y" | "z")
}

/// Rolling z-test change detector with drift analysis.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    config: ChangeConfig,
    baselines: BTreeMap<(String, String), Baseline>,
    events: BoundedLog<ChangeEvent>,
    total: u64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::with_valid_config(ChangeConfig::default())
    }
}

impl ChangeDetector {
    pub fn new(config: ChangeConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: ChangeConfig) -> Self {
        Self {
            events: BoundedLog::new(config.max_events),
            config,
            baselines: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn config(&self) -> &ChangeConfig {
        &self.config
    }

    /// Test one sample of `entity.property` and fold it into the baseline.
    ///
    /// Returns the change event when this sample confirms a change.
    pub fn record(
        &mut self,
        entity_id: &str,
        property: &str,
        value: f64,
        at: Timestamp,
    ) -> Option<ChangeEvent> {
        if !value.is_finite() {
            return None;
        }
        let cfg = &self.config;
        let baseline = self
            .baselines
            .entry((entity_id.to_string(), property.to_string()))
            .or_insert_with(|| Baseline::new(cfg.baseline_window));

        if baseline.samples.len() < cfg.min_baseline_samples {
            baseline.samples.push((at, value));
            return None;
        }

        let values = baseline.values();
        let mu = stats::mean(&values)?;
        let sigma = stats::std_dev(&values)?.max(cfg.min_std);
        let z = (value - mu).abs() / sigma;

        if z <= cfg.z_threshold {
            if !baseline.pending.is_empty() {
                debug!(entity = entity_id, property, "change candidate cancelled");
                baseline.pending.clear();
            }
            baseline.samples.push((at, value));
            return None;
        }

        let above = value > mu;
        if !baseline.pending.is_empty() && baseline.pending_above != above {
            baseline.pending.clear();
        }
        baseline.pending_above = above;
        baseline.pending.push((at, value, z));
        if baseline.pending.len() < cfg.min_persistence {
            debug!(entity = entity_id, property, z, "change candidate pending");
            return None;
        }

        let z_scores: Vec<f64> = baseline.pending.iter().map(|p| p.2).collect();
        let significance = stats::mean(&z_scores).unwrap_or(z) / cfg.z_threshold.max(EPSILON);
        baseline.samples.clear();
        for (t, v, _) in baseline.pending.drain(..) {
            baseline.samples.push((t, v));
        }

        let kind = if is_positional(property) { ChangeKind::Movement } else { ChangeKind::StateChange };
        let event = ChangeEvent {
            id: Uuid::new_v4(),
            kind,
            entity_id: entity_id.to_string(),
            property: Some(property.to_string()),
            timestamp: at,
            previous: Some(mu),
            current: Some(value),
            significance,
            description: format!("{entity_id}.{property} shifted from {mu:.3} to {value:.3}"),
        };
        Some(self.push(event))
    }

    /// Test every field of a state vector.
    pub fn observe_state(
        &mut self,
        entity_id: &str,
        state: &StateVector,
        at: Timestamp,
    ) -> Vec<ChangeEvent> {
        state
            .iter()
            .filter_map(|(field, value)| self.record(entity_id, field, value, at))
            .collect()
    }

    pub fn entity_appeared(&mut self, entity_id: &str, state: &StateVector, at: Timestamp) -> ChangeEvent {
        self.push(ChangeEvent {
            id: Uuid::new_v4(),
            kind: ChangeKind::Appearance,
            entity_id: entity_id.to_string(),
            property: None,
            timestamp: at,
            previous: None,
            current: None,
            significance: 1.0,
            description: format!("{entity_id} appeared at {state}"),
        })
    }

    /// Record a disappearance and forget the entity's baselines.
    pub fn entity_disappeared(&mut self, entity_id: &str, at: Timestamp) -> ChangeEvent {
        self.forget(entity_id);
        self.push(ChangeEvent {
            id: Uuid::new_v4(),
            kind: ChangeKind::Disappearance,
            entity_id: entity_id.to_string(),
            property: None,
            timestamp: at,
            previous: None,
            current: None,
            significance: 1.0,
            description: format!("{entity_id} is no longer present"),
        })
    }

    /// Least-squares trend over the baseline of `entity.property`.
    ///
    /// `None` until `min_baseline_samples` samples spanning more than one
    /// instant exist.
    pub fn analyze_drift(&self, entity_id: &str, property: &str) -> Option<DriftAnalysis> {
        let baseline = self
            .baselines
            .get(&(entity_id.to_string(), property.to_string()))?;
        if baseline.samples.len() < self.config.min_baseline_samples {
            return None;
        }
        let origin = baseline.samples.iter().next()?.0;
        let points: Vec<(f64, f64)> = baseline
            .samples
            .iter()
            .map(|(t, v)| (t.seconds_since(origin), *v))
            .collect();
        let fit = stats::linear_fit(&points)?;
        let span = points.last().map(|p| p.0).unwrap_or(0.0);

        let is_drifting = fit.r_squared >= self.config.drift_min_r_squared
            && fit.slope.abs() >= self.config.drift_min_rate;
        let direction = if !is_drifting {
            DriftDirection::Stable
        } else if fit.slope > 0.0 {
            DriftDirection::Increasing
        } else {
            DriftDirection::Decreasing
        };
        Some(DriftAnalysis {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            drift_rate: fit.slope,
            total_drift: fit.slope * span,
            r_squared: fit.r_squared,
            sample_count: points.len(),
            is_drifting,
            direction,
        })
    }

    /// Every property currently drifting, ordered by `(entity, property)`.
    pub fn drifting_properties(&self) -> Vec<DriftAnalysis> {
        self.baselines
            .keys()
            .filter_map(|(entity, property)| self.analyze_drift(entity, property))
            .filter(|d| d.is_drifting)
            .collect()
    }

    /// The newest `n` events, oldest first.
    pub fn recent_changes(&self, n: usize) -> Vec<&ChangeEvent> {
        self.events.recent(n).collect()
    }

    /// Total changes recorded since construction.
    pub fn change_count(&self) -> u64 {
        self.total
    }

    /// Changes recorded after the detector had seen `count` of them.
    pub fn changes_since(&self, count: u64) -> Vec<ChangeEvent> {
        let new = self.total.saturating_sub(count) as usize;
        self.events.recent(new).cloned().collect()
    }

    /// Drop every baseline belonging to `entity_id`.
    pub fn forget(&mut self, entity_id: &str) {
        self.baselines.retain(|(entity, _), _| entity != entity_id);
    }

    pub fn summary(&self) -> String {
        let drifting = self.drifting_properties();
        let mut out = format!(
            "Change detection: {} properties monitored, {} changes, {} drifting\n",
            self.baselines.len(),
            self.total,
            drifting.len()
        );
        for event in self.events.recent(5) {
            out.push_str(&format!("- [{}] {}\n", event.kind, event.description));
        }
        for d in drifting {
            out.push_str(&format!(
                "~ {}.{} drifting {:+.4}/s (r² {:.2})\n",
                d.entity_id, d.property, d.drift_rate, d.r_squared
            ));
        }
        out
    }

    fn push(&mut self, event: ChangeEvent) -> ChangeEvent {
        info!(
            kind = %event.kind,
            entity = %event.entity_id,
            significance = event.significance,
            "{}",
            event.description
        );
        self.events.push(event.clone());
        self.total += 1;
        event
    }
}
