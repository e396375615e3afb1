//! Sparse Update Handler.
//!
//! Entities are rarely observed on a regular cadence.  The handler learns
//! each entity's typical observation interval, fills the gaps between
//! observations with an [`InterpolatedState`], and ranks entities by how
//! urgently they need a fresh observation so that constrained sensing
//! bandwidth is spent where the model is weakest.
//!
//! Interpolated confidence decays with the age of the newest sample:
//!
//! ```text
//! confidence = base · e^(−age / (expected_interval · confidence_horizon))
//! ```
//!
//! with `base` = 1.0 inside the sampled span, 0.8 when extrapolating and
//! 0.6 when holding the last value.

use std::collections::BTreeMap;
use std::fmt;

use cogworld_types::stats::{EPSILON, clamp_unit};
use cogworld_types::{
    BoundedLog, StateVector, Timestamp, WorldError, ensure_non_negative, ensure_positive,
    ensure_range,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    /// Samples kept per entity.  Default `10`.
    pub max_samples: usize,
    /// Interval assumed until two samples exist.  Default `1000`.
    pub default_interval_ms: i64,
    /// An entity is stale once silent for `stale_factor` expected intervals.
    /// Default `1.5`.
    pub stale_factor: f64,
    /// Longest gap automatic selection will extrapolate across.  Default `3000`.
    pub max_extrapolation_ms: i64,
    /// Interpolated confidence time constant, in expected intervals.
    /// Default `3.0`.
    pub confidence_horizon: f64,
    /// Priority weight of speed (per unit/s).  Default `0.5`.
    pub speed_weight: f64,
    /// Speed at or above which an entity counts as fast moving.  Default `1.0`.
    pub fast_speed: f64,
    /// Confidence below which an entity counts as poorly known.  Default `0.5`.
    pub low_confidence: f64,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            max_samples: 10,
            default_interval_ms: 1_000,
            stale_factor: 1.5,
            max_extrapolation_ms: 3_000,
            confidence_horizon: 3.0,
            speed_weight: 0.5,
            fast_speed: 1.0,
            low_confidence: 0.5,
        }
    }
}

impl SparseConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        ensure_range("sparse.max_samples", self.max_samples as f64, 2.0, f64::MAX)?;
        ensure_positive("sparse.default_interval_ms", self.default_interval_ms as f64)?;
        ensure_positive("sparse.stale_factor", self.stale_factor)?;
        ensure_non_negative("sparse.max_extrapolation_ms", self.max_extrapolation_ms as f64)?;
        ensure_positive("sparse.confidence_horizon", self.confidence_horizon)?;
        ensure_non_negative("sparse.speed_weight", self.speed_weight)?;
        ensure_non_negative("sparse.fast_speed", self.fast_speed)?;
        ensure_range("sparse.low_confidence", self.low_confidence, 0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Between bracketing samples; the last segment is continued past the
    /// newest sample.
    Linear,
    VelocityExtrapolation,
    HoldLastValue,
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterpolationMethod::Linear => "linear",
            InterpolationMethod::VelocityExtrapolation => "velocity_extrapolation",
            InterpolationMethod::HoldLastValue => "hold_last_value",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedState {
    pub entity_id: String,
    pub state: StateVector,
    /// Method actually applied (a request may fall back to holding).
    pub method: InterpolationMethod,
    pub confidence: f64,
    /// Milliseconds since the newest sample (0 inside the sampled span).
    pub age_ms: i64,
    pub is_extrapolated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityReason {
    /// Seen once and overdue for a second look.
    NeverRefreshed,
    Overdue,
    FastMoving,
    LowConfidence,
    Routine,
}

impl fmt::Display for PriorityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriorityReason::NeverRefreshed => "never refreshed",
            PriorityReason::Overdue => "overdue",
            PriorityReason::FastMoving => "fast moving",
            PriorityReason::LowConfidence => "low confidence",
            PriorityReason::Routine => "routine",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePriority {
    pub entity_id: String,
    pub score: f64,
    pub reason: PriorityReason,
    /// Silence measured in expected intervals.
    pub staleness_ratio: f64,
}

#[derive(Debug, Clone)]
struct Cadence {
    samples: BoundedLog<(Timestamp, StateVector)>,
    velocity: Option<StateVector>,
    confidence: f64,
    importance: f64,
}

impl Cadence {
    fn expected_interval_ms(&self, default_ms: i64) -> f64 {
        let times: Vec<i64> = self.samples.iter().map(|s| s.0.as_millis()).collect();
        if times.len() < 2 {
            return default_ms as f64;
        }
        let span = times[times.len() - 1] - times[0];
        let interval = span as f64 / (times.len() - 1) as f64;
        if interval > 0.0 { interval } else { default_ms as f64 }
    }

    /// Rate over the newest two samples.
    fn last_segment_rate(&self) -> Option<StateVector> {
        let mut newest = self.samples.iter().rev();
        let (t1, s1) = newest.next()?;
        let (t0, s0) = newest.next()?;
        let dt = t1.seconds_since(*t0);
        if dt <= EPSILON {
            return None;
        }
        Some(
            s1.iter()
                .filter_map(|(k, v1)| s0.get(k).map(|v0| (k, (v1 - v0) / dt)))
                .collect(),
        )
    }

    fn rate(&self) -> Option<StateVector> {
        self.velocity.clone().or_else(|| self.last_segment_rate())
    }
}

fn lerp(a: &StateVector, b: &StateVector, frac: f64) -> StateVector {
    a.iter()
        .map(|(k, va)| match b.get(k) {
            Some(vb) => (k, va + (vb - va) * frac),
            None => (k, va),
        })
        .collect()
}

/// Cadence tracking, gap interpolation and observation scheduling.
#[derive(Debug, Clone)]
pub struct SparseUpdateHandler {
    config: SparseConfig,
    entities: BTreeMap<String, Cadence>,
}

impl Default for SparseUpdateHandler {
    fn default() -> Self {
        Self {
            config: SparseConfig::default(),
            entities: BTreeMap::new(),
        }
    }
}

impl SparseUpdateHandler {
    pub fn new(config: SparseConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            config,
            entities: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &SparseConfig {
        &self.config
    }

    /// Register a fresh observation of `entity_id`.
    pub fn record(&mut self, entity_id: &str, state: &StateVector, at: Timestamp) {
        let max = self.config.max_samples;
        let cadence = self.entities.entry(entity_id.to_string()).or_insert_with(|| Cadence {
            samples: BoundedLog::new(max),
            velocity: None,
            confidence: 1.0,
            importance: 1.0,
        });
        cadence.samples.push((at, state.clone()));
    }

    /// Supply an externally estimated velocity.  `false` for unknown entities.
    pub fn set_velocity(&mut self, entity_id: &str, velocity: StateVector) -> bool {
        self.with_entity(entity_id, |c| c.velocity = Some(velocity))
    }

    pub fn set_confidence(&mut self, entity_id: &str, confidence: f64) -> bool {
        self.with_entity(entity_id, |c| c.confidence = clamp_unit(confidence))
    }

    /// Scale an entity's priority.  Negative or non-finite values read as 0.
    pub fn set_importance(&mut self, entity_id: &str, importance: f64) -> bool {
        let importance = if importance.is_finite() { importance.max(0.0) } else { 0.0 };
        self.with_entity(entity_id, |c| c.importance = importance)
    }

    fn with_entity(&mut self, entity_id: &str, f: impl FnOnce(&mut Cadence)) -> bool {
        match self.entities.get_mut(entity_id) {
            Some(cadence) => {
                f(cadence);
                true
            }
            None => false,
        }
    }

    /// Mean interval between the retained samples (ms).
    pub fn expected_interval_ms(&self, entity_id: &str) -> Option<f64> {
        self.entities
            .get(entity_id)
            .map(|c| c.expected_interval_ms(self.config.default_interval_ms))
    }

    /// Whether `entity_id` has been silent for longer than
    /// `stale_factor` expected intervals.  Unknown entities are not stale.
    pub fn is_stale(&self, entity_id: &str, now: Timestamp) -> bool {
        self.staleness_ratio(entity_id, now)
            .is_some_and(|r| r > self.config.stale_factor)
    }

    /// Stale entities ordered by id.
    pub fn stale_entities(&self, now: Timestamp) -> Vec<String> {
        self.entities
            .keys()
            .filter(|id| self.is_stale(id, now))
            .cloned()
            .collect()
    }

    fn staleness_ratio(&self, entity_id: &str, now: Timestamp) -> Option<f64> {
        let cadence = self.entities.get(entity_id)?;
        let (last, _) = cadence.samples.latest()?;
        let interval = cadence.expected_interval_ms(self.config.default_interval_ms);
        Some(now.millis_since(*last).max(0) as f64 / interval.max(EPSILON))
    }

    /// Estimate the state of `entity_id` at `at` with the requested method.
    pub fn interpolate(
        &self,
        entity_id: &str,
        at: Timestamp,
        method: InterpolationMethod,
    ) -> Option<InterpolatedState> {
        let cadence = self.entities.get(entity_id)?;
        let (newest_t, newest) = cadence.samples.latest()?;
        let (oldest_t, oldest) = cadence.samples.iter().next()?;
        let after = at > *newest_t;
        let dt_s = at.seconds_since(*newest_t).max(0.0);

        let (state, applied) = match method {
            InterpolationMethod::HoldLastValue => (newest.clone(), InterpolationMethod::HoldLastValue),
            _ if at < *oldest_t => (oldest.clone(), InterpolationMethod::HoldLastValue),
            InterpolationMethod::Linear if !after => {
                let samples: Vec<_> = cadence.samples.iter().collect();
                let state = samples
                    .windows(2)
                    .find(|w| w[0].0 <= at && at <= w[1].0)
                    .map(|w| {
                        let span = w[1].0.millis_since(w[0].0);
                        let frac = if span > 0 {
                            at.millis_since(w[0].0) as f64 / span as f64
                        } else {
                            1.0
                        };
                        lerp(&w[0].1, &w[1].1, frac)
                    })
                    .unwrap_or_else(|| newest.clone());
                (state, InterpolationMethod::Linear)
            }
            InterpolationMethod::Linear => match cadence.last_segment_rate() {
                Some(rate) => (newest.extrapolate(&rate, dt_s), InterpolationMethod::Linear),
                None => (newest.clone(), InterpolationMethod::HoldLastValue),
            },
            InterpolationMethod::VelocityExtrapolation => match cadence.rate() {
                Some(rate) => (
                    newest.extrapolate(&rate, dt_s),
                    InterpolationMethod::VelocityExtrapolation,
                ),
                None => (newest.clone(), InterpolationMethod::HoldLastValue),
            },
        };

        let base = if !after {
            1.0
        } else if applied == InterpolationMethod::HoldLastValue {
            0.6
        } else {
            0.8
        };
        let age_ms = at.millis_since(*newest_t).max(0);
        let tau = cadence.expected_interval_ms(self.config.default_interval_ms)
            * self.config.confidence_horizon;
        let confidence = clamp_unit(base * (-(age_ms as f64) / tau.max(EPSILON)).exp());

        Some(InterpolatedState {
            entity_id: entity_id.to_string(),
            state,
            method: applied,
            confidence,
            age_ms,
            is_extrapolated: after && applied != InterpolationMethod::HoldLastValue,
        })
    }

    /// Interpolate with the method best suited to the gap: linear inside the
    /// sampled span, velocity extrapolation up to `max_extrapolation_ms`
    /// past it, otherwise hold.
    pub fn interpolate_auto(&self, entity_id: &str, at: Timestamp) -> Option<InterpolatedState> {
        let cadence = self.entities.get(entity_id)?;
        let (newest_t, _) = cadence.samples.latest()?;
        let gap = at.millis_since(*newest_t);
        let method = if gap <= 0 && cadence.samples.len() >= 2 {
            InterpolationMethod::Linear
        } else if gap <= self.config.max_extrapolation_ms && cadence.rate().is_some() {
            InterpolationMethod::VelocityExtrapolation
        } else {
            InterpolationMethod::HoldLastValue
        };
        debug!(entity = entity_id, gap, method = %method, "interpolating");
        self.interpolate(entity_id, at, method)
    }

    /// How urgently `entity_id` needs a fresh observation.
    pub fn priority(&self, entity_id: &str, now: Timestamp) -> Option<UpdatePriority> {
        let cadence = self.entities.get(entity_id)?;
        let ratio = self.staleness_ratio(entity_id, now)?;
        let speed = cadence.rate().map(|v| v.magnitude()).unwrap_or(0.0);
        let cfg = &self.config;
        let score =
            cadence.importance * (ratio + cfg.speed_weight * speed + (1.0 - cadence.confidence));

        let overdue = ratio > cfg.stale_factor;
        let reason = if overdue && cadence.samples.len() == 1 {
            PriorityReason::NeverRefreshed
        } else if overdue {
            PriorityReason::Overdue
        } else if speed >= cfg.fast_speed {
            PriorityReason::FastMoving
        } else if cadence.confidence < cfg.low_confidence {
            PriorityReason::LowConfidence
        } else {
            PriorityReason::Routine
        };
        Some(UpdatePriority {
            entity_id: entity_id.to_string(),
            score,
            reason,
            staleness_ratio: ratio,
        })
    }

    /// Every entity's priority, most urgent first (ties by id).
    pub fn priorities(&self, now: Timestamp) -> Vec<UpdatePriority> {
        let mut all: Vec<UpdatePriority> = self
            .entities
            .keys()
            .filter_map(|id| self.priority(id, now))
            .collect();
        all.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity_id.cmp(&b.entity_id)));
        all
    }

    pub fn next_to_observe(&self, now: Timestamp) -> Option<UpdatePriority> {
        self.priorities(now).into_iter().next()
    }

    pub fn remove(&mut self, entity_id: &str) -> bool {
        self.entities.remove(entity_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
