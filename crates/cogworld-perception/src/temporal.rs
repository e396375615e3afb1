//! Temporal Coherence Engine.
//!
//! Maintains one smoothed [`TemporalState`] per entity from a stream of noisy,
//! irregularly sampled [`Observation`]s.  Each update:
//!
//! 1. checks the observation against the *pre-update* belief for kinematic
//!    anomalies (position jumps, motion-model discontinuities),
//! 2. smooths the raw value into the belief with an exponential filter,
//! 3. re-estimates per-field velocity by confidence-weighted least squares
//!    over a sliding time window,
//! 4. blends confidence using the fixed per-source reliability table,
//! 5. refreshes the short-horizon prediction.
//!
//! The smoothing step is a first-order filter:
//! ```text
//! current = α · previous + (1 − α) · observed
//! ```
//! with α = `smoothing_factor` (0 = no smoothing, 1 = frozen).
//!
//! Between observations [`TemporalCoherenceEngine::tick`] decays the
//! confidence of unobservable entities:
//! ```text
//! confidence(t + Δt) = confidence(t) · e^(−decay_rate · Δt)
//! ```
//! and forgets them once confidence drops below half of `min_confidence`.
//!
//! # Example
//!
//! ```rust
//! use cogworld_perception::temporal::TemporalCoherenceEngine;
//! use cogworld_types::{Observation, SensorSource, StateVector, Timestamp};
//!
//! let mut engine = TemporalCoherenceEngine::default();
//! let obs = Observation::new(
//!     "wall-1",
//!     StateVector::from([("x", 1.0), ("y", 0.0), ("z", 0.0)]),
//!     SensorSource::DistanceSensor,
//!     Timestamp(0),
//! )
//! .with_confidence(0.95)
//! .with_noise(0.01);
//!
//! let state = engine.observe(&obs);
//! assert!((state.confidence - 0.95 * 0.9).abs() < 1e-9);
//! assert!(state.previous.is_none());
//! assert!(state.is_observable);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use cogworld_types::stats::{self, EPSILON, clamp_unit};
use cogworld_types::{
    Anomaly, AnomalyKind, BoundedLog, Observation, SensorSource, StateVector, Timestamp,
    WorldError, ensure_non_negative, ensure_positive, ensure_range,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Number of recent raw samples the stability estimate looks at.
const STABILITY_SAMPLES: usize = 10;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning parameters for [`TemporalCoherenceEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Exponential smoothing factor α ∈ [0, 1].  Default `0.3`.
    pub smoothing_factor: f64,
    /// Sliding window for velocity regression (ms).  Default `2000`.
    pub velocity_window_ms: i64,
    /// How far ahead the stored prediction looks (ms).  Default `500`.
    pub prediction_horizon_ms: i64,
    /// Confidence decay rate for unobservable entities (1/s).  Default `0.1`.
    pub confidence_decay_rate: f64,
    /// Below this confidence an unobservable entity counts as disappeared;
    /// below half of it the entity is forgotten.  Default `0.1`.
    pub min_confidence: f64,
    /// Multiplier applied to every anomaly trigger level.  Default `3.0`.
    pub anomaly_threshold: f64,
    /// Raw samples retained per entity.  Default `50`.
    pub max_history: usize,
    /// Silence (ms) after which a newly seen entity counts as a sudden
    /// appearance.  Default `2000`.
    pub appearance_gap_ms: i64,
    /// Movement always tolerated regardless of velocity (state units).
    /// Default `0.05`.
    pub baseline_move: f64,
    /// Speed assumed when no velocity estimate exists yet (units/s).
    /// Default `0.5`.
    pub slow_motion_speed: f64,
    /// Weight of a fresh observation when blending confidence.  Default `0.7`.
    pub confidence_blend: f64,
    /// Variance-to-instability scale.  Default `10.0`.
    pub stability_sensitivity: f64,
    /// Silence (ms) after which an observable entity is marked unobservable
    /// by [`TemporalCoherenceEngine::tick`].  Default `5000`.
    pub stale_after_ms: i64,
    /// Anomalies retained in the ring log.  Default `100`.
    pub max_anomalies: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.3,
            velocity_window_ms: 2_000,
            prediction_horizon_ms: 500,
            confidence_decay_rate: 0.1,
            min_confidence: 0.1,
            anomaly_threshold: 3.0,
            max_history: 50,
            appearance_gap_ms: 2_000,
            baseline_move: 0.05,
            slow_motion_speed: 0.5,
            confidence_blend: 0.7,
            stability_sensitivity: 10.0,
            stale_after_ms: 5_000,
            max_anomalies: 100,
        }
    }
}

impl TemporalConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        ensure_range("temporal.smoothing_factor", self.smoothing_factor, 0.0, 1.0)?;
        ensure_positive("temporal.velocity_window_ms", self.velocity_window_ms as f64)?;
        ensure_non_negative("temporal.prediction_horizon_ms", self.prediction_horizon_ms as f64)?;
        ensure_non_negative("temporal.confidence_decay_rate", self.confidence_decay_rate)?;
        ensure_range("temporal.min_confidence", self.min_confidence, 0.0, 1.0)?;
        ensure_positive("temporal.anomaly_threshold", self.anomaly_threshold)?;
        ensure_positive("temporal.max_history", self.max_history as f64)?;
        ensure_non_negative("temporal.appearance_gap_ms", self.appearance_gap_ms as f64)?;
        ensure_non_negative("temporal.baseline_move", self.baseline_move)?;
        ensure_non_negative("temporal.slow_motion_speed", self.slow_motion_speed)?;
        ensure_range("temporal.confidence_blend", self.confidence_blend, 0.0, 1.0)?;
        ensure_non_negative("temporal.stability_sensitivity", self.stability_sensitivity)?;
        ensure_positive("temporal.stale_after_ms", self.stale_after_ms as f64)?;
        ensure_positive("temporal.max_anomalies", self.max_anomalies as f64)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public state types
// ────────────────────────────────────────────────────────────────────────────

/// Smoothed belief about one entity's kinematic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemporalState {
    pub entity_id: String,
    /// Smoothed current estimate.
    pub current: StateVector,
    /// Estimate before the most recent observation (`None` after the first).
    pub previous: Option<StateVector>,
    /// Short-horizon prediction from the current velocity.
    pub predicted: Option<StateVector>,
    /// Per-field rate of change (units/s).
    pub velocity: Option<StateVector>,
    /// Belief confidence in `[0, 1]`.
    pub confidence: f64,
    /// `1` for a perfectly steady history, decreasing with variance; floor `0`.
    pub stability: f64,
    pub last_observed: Timestamp,
    pub observation_count: u64,
    /// `false` once the entity has left the sensors' view.
    pub is_observable: bool,
    /// Source of the most recent observation.
    pub source: SensorSource,
}

/// One raw observation retained in an entity's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub timestamp: Timestamp,
    pub value: StateVector,
    /// Source-weighted confidence of the sample.
    pub confidence: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entity record
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct EntityRecord {
    state: TemporalState,
    history: BoundedLog<HistorySample>,
    /// Time up to which confidence decay has already been applied.
    last_decay: Timestamp,
    disappearance_flagged: bool,
}

impl EntityRecord {
    fn first(obs: &Observation, confidence: f64, max_history: usize) -> Self {
        let mut history = BoundedLog::new(max_history);
        history.push(HistorySample {
            timestamp: obs.timestamp,
            value: obs.state.clone(),
            confidence,
        });
        Self {
            state: TemporalState {
                entity_id: obs.entity_id.clone(),
                current: obs.state.clone(),
                previous: None,
                predicted: None,
                velocity: None,
                confidence,
                stability: 1.0,
                last_observed: obs.timestamp,
                observation_count: 1,
                is_observable: true,
                source: obs.source.clone(),
            },
            history,
            last_decay: obs.timestamp,
            disappearance_flagged: false,
        }
    }

    fn apply(&mut self, obs: &Observation, confidence: f64, config: &TemporalConfig) {
        self.history.push(HistorySample {
            timestamp: obs.timestamp,
            value: obs.state.clone(),
            confidence,
        });

        let state = &mut self.state;
        let smoothed = state.current.blend(&obs.state, config.smoothing_factor);
        state.previous = Some(std::mem::replace(&mut state.current, smoothed));

        if let Some(v) = estimate_velocity(&self.history, obs.timestamp, config.velocity_window_ms) {
            state.velocity = Some(v);
        }
        let blend = config.confidence_blend;
        state.confidence = clamp_unit(state.confidence * (1.0 - blend) + confidence * blend);
        let horizon = config.prediction_horizon_ms as f64 / 1000.0;
        state.predicted = state.velocity.as_ref().map(|v| state.current.extrapolate(v, horizon));

        state.last_observed = state.last_observed.max(obs.timestamp);
        state.observation_count += 1;
        state.is_observable = true;
        state.source = obs.source.clone();
        state.stability = stability(&self.history, config.stability_sensitivity);

        self.last_decay = self.last_decay.max(obs.timestamp);
        self.disappearance_flagged = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Estimation helpers
// ────────────────────────────────────────────────────────────────────────────

/// Per-field velocity by weighted least squares over samples inside the
/// window.  Recent, confident samples weigh more:
/// `w = confidence · e^(−age / window)`.
fn estimate_velocity(
    history: &BoundedLog<HistorySample>,
    now: Timestamp,
    window_ms: i64,
) -> Option<StateVector> {
    let window_s = window_ms as f64 / 1000.0;
    let recent: Vec<&HistorySample> = history
        .iter()
        .filter(|s| now.millis_since(s.timestamp) <= window_ms)
        .collect();
    if recent.len() < 2 {
        return None;
    }

    let fields: BTreeSet<&str> = recent.iter().flat_map(|s| s.value.fields()).collect();
    let mut velocity = StateVector::new();
    for field in fields {
        let samples: Vec<(f64, f64, f64)> = recent
            .iter()
            .filter_map(|s| {
                let x = s.value.get(field)?;
                let age = now.seconds_since(s.timestamp).max(0.0);
                let weight = s.confidence.max(EPSILON) * (-age / window_s).exp();
                Some((-age, x, weight))
            })
            .collect();
        if let Some(slope) = stats::weighted_slope(&samples) {
            velocity.insert(field, slope);
        }
    }
    (!velocity.is_empty()).then_some(velocity)
}

/// `max(0, 1 − mean_field_variance · sensitivity)` over the latest samples.
fn stability(history: &BoundedLog<HistorySample>, sensitivity: f64) -> f64 {
    let recent: Vec<&HistorySample> = history.recent(STABILITY_SAMPLES).collect();
    if recent.len() < 2 {
        return 1.0;
    }
    let fields: BTreeSet<&str> = recent.iter().flat_map(|s| s.value.fields()).collect();
    let variances: Vec<f64> = fields
        .into_iter()
        .filter_map(|field| {
            let values: Vec<f64> = recent.iter().filter_map(|s| s.value.get(field)).collect();
            if values.len() < 2 { None } else { stats::variance(&values) }
        })
        .collect();
    match stats::mean(&variances) {
        Some(v) => (1.0 - v * sensitivity).clamp(0.0, 1.0),
        None => 1.0,
    }
}

fn detect_anomalies(record: &EntityRecord, config: &TemporalConfig, obs: &Observation) -> Vec<Anomaly> {
    let mut found = Vec::new();
    let state = &record.state;
    let id = &state.entity_id;

    // Position jump: distance from the last belief against kinematic reach.
    let dt = obs.timestamp.seconds_since(state.last_observed).max(0.0);
    let distance = state.current.distance(&obs.state);
    let expected_move = match &state.velocity {
        Some(v) => v.magnitude() * dt * 2.0 + config.baseline_move,
        None => config.slow_motion_speed * dt + config.baseline_move,
    };
    let limit = (expected_move * config.anomaly_threshold).max(EPSILON);
    if distance > limit {
        found.push(
            Anomaly::new(
                AnomalyKind::PositionJump,
                id.clone(),
                obs.timestamp,
                distance / limit,
                format!(
                    "{id} moved {distance:.3} in {dt:.2}s (expected at most {expected_move:.3})"
                ),
            )
            .with_states(Some(state.current.clone()), Some(obs.state.clone())),
        );
    }

    // Discontinuity: the last raw sample extrapolated by the motion model.
    if let (Some(velocity), Some(last)) = (&state.velocity, record.history.latest()) {
        let dt_last = obs.timestamp.seconds_since(last.timestamp).max(0.0);
        let predicted = last.value.extrapolate(velocity, dt_last);
        let error = predicted.distance(&obs.state);
        let tolerance = obs.noise.max(EPSILON) * config.anomaly_threshold;
        if error > tolerance {
            found.push(
                Anomaly::new(
                    AnomalyKind::StateDiscontinuity,
                    id.clone(),
                    obs.timestamp,
                    error / tolerance,
                    format!("{id} deviates {error:.3} from its motion model (noise {:.3})", obs.noise),
                )
                .with_states(Some(predicted), Some(obs.state.clone())),
            );
        }
    }
    found
}

// ────────────────────────────────────────────────────────────────────────────
// TemporalCoherenceEngine
// ────────────────────────────────────────────────────────────────────────────

/// Per-entity temporal smoothing, velocity estimation, prediction and
/// kinematic anomaly detection.
///
/// Feed observations with [`observe`][Self::observe], advance the logical
/// clock with [`tick`][Self::tick], and read beliefs with
/// [`get_state`][Self::get_state] / [`get_all_entities`][Self::get_all_entities].
/// Updates for one entity must arrive in non-decreasing timestamp order.
#[derive(Debug, Clone)]
pub struct TemporalCoherenceEngine {
    config: TemporalConfig,
    entities: BTreeMap<String, EntityRecord>,
    anomalies: BoundedLog<Anomaly>,
    /// Anomalies ever recorded, including ones evicted from the log.
    anomaly_total: u64,
    last_observation: Option<Timestamp>,
}

impl Default for TemporalCoherenceEngine {
    fn default() -> Self {
        Self::with_valid_config(TemporalConfig::default())
    }
}

impl TemporalCoherenceEngine {
    /// Create an engine, rejecting out-of-range configuration.
    pub fn new(config: TemporalConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: TemporalConfig) -> Self {
        Self {
            anomalies: BoundedLog::new(config.max_anomalies),
            config,
            entities: BTreeMap::new(),
            anomaly_total: 0,
            last_observation: None,
        }
    }

    pub fn config(&self) -> &TemporalConfig {
        &self.config
    }

    /// Incorporate one observation and return the updated belief.
    pub fn observe(&mut self, obs: &Observation) -> TemporalState {
        let confidence = clamp_unit(obs.confidence * obs.source.reliability_weight());
        let gap = self.last_observation.map(|t| obs.timestamp.millis_since(t));
        self.last_observation = Some(match self.last_observation {
            Some(t) => t.max(obs.timestamp),
            None => obs.timestamp,
        });

        if let Some(record) = self.entities.get_mut(&obs.entity_id) {
            if obs.timestamp < record.state.last_observed {
                warn!(
                    entity = %obs.entity_id,
                    at = obs.timestamp.as_millis(),
                    last = record.state.last_observed.as_millis(),
                    "out-of-order observation"
                );
            }
            let found = detect_anomalies(record, &self.config, obs);
            record.apply(obs, confidence, &self.config);
            let state = record.state.clone();
            debug!(
                entity = %obs.entity_id,
                confidence = state.confidence,
                count = state.observation_count,
                "temporal state updated"
            );
            for anomaly in found {
                self.record_anomaly(anomaly);
            }
            return state;
        }

        if let Some(gap) = gap
            && !self.entities.is_empty()
            && gap > self.config.appearance_gap_ms
        {
            let significance = gap as f64 / self.config.appearance_gap_ms.max(1) as f64;
            self.record_anomaly(
                Anomaly::new(
                    AnomalyKind::SuddenAppearance,
                    obs.entity_id.clone(),
                    obs.timestamp,
                    significance,
                    format!("{} appeared after {gap}ms without observations", obs.entity_id),
                )
                .with_states(None, Some(obs.state.clone())),
            );
        }

        let record = EntityRecord::first(obs, confidence, self.config.max_history);
        let state = record.state.clone();
        debug!(entity = %obs.entity_id, confidence, source = %obs.source, "new entity");
        self.entities.insert(obs.entity_id.clone(), record);
        state
    }

    /// Flag an entity as out of view so that [`tick`][Self::tick] decays it.
    ///
    /// Returns `false` for unknown entities.
    pub fn mark_unobservable(&mut self, entity_id: &str) -> bool {
        match self.entities.get_mut(entity_id) {
            Some(record) => {
                record.state.is_observable = false;
                true
            }
            None => false,
        }
    }

    /// Advance the logical clock to `now`.
    ///
    /// Decays the confidence of unobservable entities by the time elapsed
    /// since their last decay, refreshes their predictions, flags a single
    /// `sudden_disappearance` once confidence crosses `min_confidence`, and
    /// forgets entities whose confidence falls below half of it.
    ///
    /// Returns the ids forgotten by this tick, sorted.
    pub fn tick(&mut self, now: Timestamp) -> Vec<String> {
        let config = &self.config;
        let mut forgotten = Vec::new();
        let mut found = Vec::new();

        for (id, record) in self.entities.iter_mut() {
            let state = &mut record.state;
            if state.is_observable && now.millis_since(state.last_observed) > config.stale_after_ms {
                state.is_observable = false;
                debug!(entity = %id, "entity went stale; marking unobservable");
            }

            if !state.is_observable {
                let dt = now.seconds_since(record.last_decay);
                if dt > 0.0 {
                    state.confidence =
                        clamp_unit(state.confidence * (-config.confidence_decay_rate * dt).exp());
                    record.last_decay = now;
                }
                if let Some(v) = &state.velocity {
                    let since = now.seconds_since(state.last_observed).max(0.0);
                    state.predicted = Some(state.current.extrapolate(v, since));
                }
                if state.confidence < config.min_confidence && !record.disappearance_flagged {
                    record.disappearance_flagged = true;
                    found.push(
                        Anomaly::new(
                            AnomalyKind::SuddenDisappearance,
                            id.clone(),
                            now,
                            config.min_confidence / state.confidence.max(EPSILON),
                            format!(
                                "{id} unobserved for {:.1}s; confidence {:.3}",
                                now.seconds_since(state.last_observed),
                                state.confidence
                            ),
                        )
                        .with_states(Some(state.current.clone()), None),
                    );
                }
                if state.confidence < config.min_confidence / 2.0 {
                    forgotten.push(id.clone());
                }
            }
            state.stability = stability(&record.history, config.stability_sensitivity);
        }

        for anomaly in found {
            self.record_anomaly(anomaly);
        }
        for id in &forgotten {
            self.entities.remove(id);
            info!(entity = %id, "entity forgotten");
        }
        forgotten
    }

    /// Predicted state of `entity_id` at `at`, extrapolated from the current
    /// estimate by the latest velocity (the estimate itself when no velocity
    /// is known yet).
    pub fn predict(&self, entity_id: &str, at: Timestamp) -> Option<StateVector> {
        let state = &self.entities.get(entity_id)?.state;
        Some(match &state.velocity {
            Some(v) => state.current.extrapolate(v, at.seconds_since(state.last_observed).max(0.0)),
            None => state.current.clone(),
        })
    }

    pub fn get_state(&self, entity_id: &str) -> Option<&TemporalState> {
        self.entities.get(entity_id).map(|r| &r.state)
    }

    /// All live entities, ordered by id.
    pub fn get_all_entities(&self) -> Vec<&TemporalState> {
        self.entities.values().map(|r| &r.state).collect()
    }

    /// Raw samples retained for `entity_id`, oldest first.
    pub fn history(&self, entity_id: &str) -> Vec<&HistorySample> {
        self.entities
            .get(entity_id)
            .map(|r| r.history.iter().collect())
            .unwrap_or_default()
    }

    /// Drop an entity explicitly.
    pub fn remove(&mut self, entity_id: &str) -> Option<TemporalState> {
        self.entities.remove(entity_id).map(|r| r.state)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The newest `n` anomalies, oldest first.
    pub fn recent_anomalies(&self, n: usize) -> Vec<&Anomaly> {
        self.anomalies.recent(n).collect()
    }

    /// Total anomalies recorded since construction.
    pub fn anomaly_count(&self) -> u64 {
        self.anomaly_total
    }

    /// Anomalies recorded after the engine had seen `count` of them.
    pub fn anomalies_since(&self, count: u64) -> Vec<Anomaly> {
        let new = self.anomaly_total.saturating_sub(count) as usize;
        self.anomalies.recent(new).cloned().collect()
    }

    fn record_anomaly(&mut self, anomaly: Anomaly) {
        warn!(
            kind = %anomaly.kind,
            entity = %anomaly.entity_id,
            significance = anomaly.significance,
            "{}",
            anomaly.description
        );
        self.anomalies.push(anomaly);
        self.anomaly_total += 1;
    }

    /// Compact textual report of every live entity and the latest anomalies.
    pub fn summary(&self) -> String {
        let observable = self.entities.values().filter(|r| r.state.is_observable).count();
        let mut out = format!(
            "Temporal coherence: {} entities ({} observable), {} anomalies recorded\n",
            self.entities.len(),
            observable,
            self.anomaly_total
        );
        for state in self.get_all_entities() {
            let status = if state.is_observable { "observed" } else { "unobserved" };
            out.push_str(&format!(
                "- {}: {} conf {:.2} stab {:.2} [{status}]",
                state.entity_id, state.current, state.confidence, state.stability
            ));
            if let Some(v) = &state.velocity {
                out.push_str(&format!(" vel {v}"));
            }
            out.push('\n');
        }
        for anomaly in self.anomalies.recent(3) {
            out.push_str(&format!(
                "! {} {} (x{:.1}): {}\n",
                anomaly.kind, anomaly.entity_id, anomaly.significance, anomaly.description
            ));
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: &str, x: f64, t_ms: i64) -> Observation {
        Observation::new(
            id,
            StateVector::from([("x", x), ("y", 0.0), ("z", 0.0)]),
            SensorSource::DistanceSensor,
            Timestamp(t_ms),
        )
        .with_confidence(0.95)
        .with_noise(0.05)
    }

    fn anomalies_of(engine: &TemporalCoherenceEngine, kind: AnomalyKind) -> Vec<&Anomaly> {
        engine
            .recent_anomalies(usize::MAX)
            .into_iter()
            .filter(|a| a.kind == kind)
            .collect()
    }

    // ── observe ─────────────────────────────────────────────────────────────

    #[test]
    fn first_observation_creates_fresh_state() {
        let mut engine = TemporalCoherenceEngine::default();
        let observation = Observation::new(
            "wall-1",
            StateVector::from([("x", 1.0), ("y", 0.0), ("z", 0.0)]),
            SensorSource::DistanceSensor,
            Timestamp(0),
        )
        .with_confidence(0.95)
        .with_noise(0.01);
        engine.observe(&observation);

        let state = engine.get_state("wall-1").unwrap();
        assert!((state.confidence - 0.95 * 0.9).abs() < 1e-9);
        assert_eq!(state.observation_count, 1);
        assert!(state.previous.is_none());
        assert!(state.is_observable);
        assert!(state.velocity.is_none());
    }

    #[test]
    fn second_observation_is_smoothed() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        let state = engine.observe(&obs("a", 0.1, 100));

        // α = 0.3 → 0.3·0 + 0.7·0.1
        assert!((state.current.get("x").unwrap() - 0.07).abs() < 1e-9);
        assert_eq!(state.previous.as_ref().unwrap().get("x"), Some(0.0));
        assert_eq!(state.observation_count, 2);
    }

    #[test]
    fn smoothing_extremes() {
        let frozen = TemporalConfig {
            smoothing_factor: 1.0,
            ..TemporalConfig::default()
        };
        let mut engine = TemporalCoherenceEngine::new(frozen).unwrap();
        engine.observe(&obs("a", 0.0, 0));
        assert_eq!(engine.observe(&obs("a", 0.1, 100)).current.get("x"), Some(0.0));

        let raw = TemporalConfig {
            smoothing_factor: 0.0,
            ..TemporalConfig::default()
        };
        let mut engine = TemporalCoherenceEngine::new(raw).unwrap();
        engine.observe(&obs("a", 0.0, 0));
        assert_eq!(engine.observe(&obs("a", 0.1, 100)).current.get("x"), Some(0.1));
    }

    #[test]
    fn velocity_and_prediction_from_constant_motion() {
        let mut engine = TemporalCoherenceEngine::default();
        for i in 0..4 {
            engine.observe(&obs("cart", 0.1 * i as f64, 100 * i));
        }
        let state = engine.get_state("cart").unwrap();
        let vx = state.velocity.as_ref().unwrap().get("x").unwrap();
        assert!((vx - 1.0).abs() < 1e-6, "vx = {vx}");

        let predicted = state.predicted.as_ref().unwrap().get("x").unwrap();
        let current = state.current.get("x").unwrap();
        assert!((predicted - (current + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn smooth_motion_raises_no_anomalies() {
        let mut engine = TemporalCoherenceEngine::default();
        for i in 0..6 {
            engine.observe(&obs("cart", 0.1 * i as f64, 100 * i));
        }
        assert_eq!(engine.anomaly_count(), 0);
    }

    #[test]
    fn position_jump_is_flagged_with_significance_above_one() {
        let mut engine = TemporalCoherenceEngine::default();
        for i in 0..3 {
            engine.observe(&obs("cart", 0.1 * i as f64, 100 * i));
        }
        engine.observe(&obs("cart", 5.0, 300));

        let jumps = anomalies_of(&engine, AnomalyKind::PositionJump);
        assert_eq!(jumps.len(), 1);
        assert!(jumps[0].significance > 1.0);
        assert_eq!(jumps[0].entity_id, "cart");
        assert!(jumps[0].expected.is_some());
    }

    #[test]
    fn discontinuity_against_motion_model() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("cart", 0.0, 0));
        engine.observe(&obs("cart", 0.1, 100));
        // Motion model expects 0.2; 0.36 is 0.16 off against a 0.05 × 3 tolerance.
        engine.observe(&obs("cart", 0.36, 200));
        assert_eq!(anomalies_of(&engine, AnomalyKind::StateDiscontinuity).len(), 1);
        assert!(anomalies_of(&engine, AnomalyKind::PositionJump).is_empty());
    }

    #[test]
    fn sudden_appearance_after_quiet_gap() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        engine.observe(&obs("b", 1.0, 100));
        assert_eq!(engine.anomaly_count(), 0);

        engine.observe(&obs("c", 2.0, 5_000));
        let appearances = anomalies_of(&engine, AnomalyKind::SuddenAppearance);
        assert_eq!(appearances.len(), 1);
        assert_eq!(appearances[0].entity_id, "c");
    }

    #[test]
    fn first_entity_never_counts_as_sudden() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 10_000));
        assert_eq!(engine.anomaly_count(), 0);
    }

    #[test]
    fn missing_fields_keep_previous_values() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 1.0, 0));
        let mut partial = StateVector::new();
        partial.insert("x", 1.0);
        partial.insert("y", f64::NAN);
        let o = Observation::new("a", partial, SensorSource::Manual, Timestamp(100));
        let state = engine.observe(&o);
        assert_eq!(state.current.get("y"), Some(0.0));
        assert_eq!(state.observation_count, 2);
    }

    #[test]
    fn confidence_blends_towards_source_weight() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        let inference = Observation::new(
            "a",
            StateVector::from([("x", 0.0), ("y", 0.0), ("z", 0.0)]),
            SensorSource::Inference,
            Timestamp(100),
        );
        let state = engine.observe(&inference);
        let expected = 0.855 * 0.3 + 0.6 * 0.7;
        assert!((state.confidence - expected).abs() < 1e-9);
        assert_eq!(state.source, SensorSource::Inference);
    }

    #[test]
    fn history_is_bounded() {
        let config = TemporalConfig {
            max_history: 5,
            ..TemporalConfig::default()
        };
        let mut engine = TemporalCoherenceEngine::new(config).unwrap();
        for i in 0..12 {
            engine.observe(&obs("a", 0.0, 100 * i));
        }
        let history = engine.history("a");
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].timestamp, Timestamp(700));
    }

    // ── stability ───────────────────────────────────────────────────────────

    #[test]
    fn stationary_entity_is_stable_and_jitter_is_not() {
        let mut engine = TemporalCoherenceEngine::default();
        for i in 0..5 {
            engine.observe(&obs("still", 1.0, 100 * i));
            let jitter = if i % 2 == 0 { 0.0 } else { 0.5 };
            engine.observe(&obs("shaky", jitter, 100 * i));
        }
        assert!((engine.get_state("still").unwrap().stability - 1.0).abs() < 1e-9);
        assert!(engine.get_state("shaky").unwrap().stability < 1.0);
    }

    // ── tick ────────────────────────────────────────────────────────────────

    #[test]
    fn unobservable_entity_decays_disappears_and_is_forgotten() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("box", 0.0, 0));
        assert!(engine.mark_unobservable("box"));

        let mut last_confidence = engine.get_state("box").unwrap().confidence;
        let mut forgotten_at = None;
        for s in 1..=120 {
            let forgotten = engine.tick(Timestamp(s * 1_000));
            if let Some(state) = engine.get_state("box") {
                assert!(state.confidence <= last_confidence);
                last_confidence = state.confidence;
            }
            if forgotten.contains(&"box".to_string()) {
                forgotten_at = Some(s);
            }
        }

        assert_eq!(anomalies_of(&engine, AnomalyKind::SuddenDisappearance).len(), 1);
        assert!(engine.get_all_entities().is_empty());
        // 0.855·e^(−0.1·t) < 0.05 first holds at t = 29 s.
        assert_eq!(forgotten_at, Some(29));
    }

    #[test]
    fn tick_at_same_instant_is_noop() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("box", 0.0, 1_000));
        engine.mark_unobservable("box");
        let before = engine.get_state("box").unwrap().confidence;
        engine.tick(Timestamp(1_000));
        assert_eq!(engine.get_state("box").unwrap().confidence, before);
    }

    #[test]
    fn observable_entities_do_not_decay() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        let before = engine.get_state("a").unwrap().confidence;
        engine.tick(Timestamp(2_000));
        assert_eq!(engine.get_state("a").unwrap().confidence, before);
        assert!(engine.get_state("a").unwrap().is_observable);
    }

    #[test]
    fn silent_entities_go_stale() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        engine.tick(Timestamp(6_000));
        let state = engine.get_state("a").unwrap();
        assert!(!state.is_observable);
        assert!(state.confidence < 0.855);
    }

    #[test]
    fn reobservation_restores_observability() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("a", 0.0, 0));
        engine.mark_unobservable("a");
        engine.tick(Timestamp(3_000));
        let state = engine.observe(&obs("a", 0.0, 3_100));
        assert!(state.is_observable);
    }

    #[test]
    fn mark_unknown_entity_returns_false() {
        let mut engine = TemporalCoherenceEngine::default();
        assert!(!engine.mark_unobservable("ghost"));
    }

    // ── prediction ──────────────────────────────────────────────────────────

    #[test]
    fn predict_extrapolates_from_last_observation() {
        let mut engine = TemporalCoherenceEngine::default();
        for i in 0..3 {
            engine.observe(&obs("cart", 0.1 * i as f64, 100 * i));
        }
        let current = engine.get_state("cart").unwrap().current.get("x").unwrap();
        let at = engine.predict("cart", Timestamp(1_200)).unwrap();
        assert!((at.get("x").unwrap() - (current + 1.0)).abs() < 1e-6);
        assert!(engine.predict("ghost", Timestamp(0)).is_none());
    }

    // ── configuration ───────────────────────────────────────────────────────

    #[test]
    fn invalid_configuration_rejected_at_construction() {
        let bad = TemporalConfig {
            anomaly_threshold: -1.0,
            ..TemporalConfig::default()
        };
        assert!(matches!(
            TemporalCoherenceEngine::new(bad),
            Err(WorldError::InvalidConfig { .. })
        ));
        let bad = TemporalConfig {
            smoothing_factor: 1.5,
            ..TemporalConfig::default()
        };
        assert!(TemporalCoherenceEngine::new(bad).is_err());
    }

    #[test]
    fn summary_lists_entities() {
        let mut engine = TemporalCoherenceEngine::default();
        engine.observe(&obs("wall-1", 1.0, 0));
        let summary = engine.summary();
        assert!(summary.contains("1 entities"));
        assert!(summary.contains("wall-1"));
    }
}
