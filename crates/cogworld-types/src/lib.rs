//! `cogworld-types` – shared vocabulary for the world-model engines.
//!
//! Every engine in the workspace speaks in terms of the types defined here:
//! [`Observation`]s come in from the sensor layer, [`StateVector`]s carry the
//! numeric state of one entity, [`Anomaly`] records flag discrepancies, and
//! [`WorldError`] is the single error type shared by all crates.
//!
//! The [`stats`] module holds the small numeric kernel (robust spread,
//! weighted regression, normal CDF) the estimation engines are built on.

pub mod stats;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Timestamp
// ────────────────────────────────────────────────────────────────────────────

/// Milliseconds since the Unix epoch.
///
/// Engines never read the clock themselves; time always enters through a
/// `Timestamp` argument so that every engine can be driven by a synthetic
/// clock in tests.  [`Timestamp::now`] is the only wall-clock read and is
/// meant to be called by the host at the call boundary.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Build a timestamp from fractional seconds (rounded to the nearest ms).
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1000.0).round() as i64)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Signed milliseconds elapsed since `earlier`, saturating at the `i64`
    /// bounds.
    pub const fn millis_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Signed seconds elapsed since `earlier`.
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        self.millis_since(earlier) as f64 / 1000.0
    }

    pub const fn plus_millis(self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%H:%M:%S%.3f")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StateVector
// ────────────────────────────────────────────────────────────────────────────

/// Named numeric state of one entity (e.g. `{x, y, z}` or `{temperature}`).
///
/// Fields are kept in name order, so iteration and serialisation are
/// deterministic.  Non-finite values are never stored: [`StateVector::insert`]
/// drops them and reports `false`, which is how malformed readings are
/// skipped per field instead of rejecting a whole observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StateVector(BTreeMap<String, f64>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.  Returns `false` (and stores nothing) when
    /// `value` is NaN or infinite.
    pub fn insert(&mut self, field: impl Into<String>, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.0.insert(field.into(), value);
        true
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.0.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<f64> {
        self.0.remove(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Euclidean distance over the fields both vectors share.
    ///
    /// Returns `0.0` when the vectors have no field in common.
    pub fn distance(&self, other: &StateVector) -> f64 {
        self.iter()
            .filter_map(|(k, a)| other.get(k).map(|b| (a - b).powi(2)))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean norm over all fields.
    pub fn magnitude(&self) -> f64 {
        self.0.values().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// `self + rate × dt_secs`, field by field.  Fields without a rate are
    /// carried over unchanged.
    pub fn extrapolate(&self, rate: &StateVector, dt_secs: f64) -> StateVector {
        let mut out = self.clone();
        for (k, v) in out.0.iter_mut() {
            if let Some(r) = rate.get(k) {
                let next = *v + r * dt_secs;
                if next.is_finite() {
                    *v = next;
                }
            }
        }
        out
    }

    /// Exponential blend: `keep × self + (1 − keep) × incoming` on shared
    /// fields.  Fields only present in `incoming` are taken as-is; fields only
    /// present in `self` are kept.
    pub fn blend(&self, incoming: &StateVector, keep: f64) -> StateVector {
        let mut out = self.clone();
        for (k, new) in incoming.iter() {
            let value = match self.get(k) {
                Some(old) => keep * old + (1.0 - keep) * new,
                None => new,
            };
            out.insert(k, value);
        }
        out
    }

    /// `[x, y, z]` projection, with missing axes read as `0.0`.
    pub fn xyz(&self) -> [f64; 3] {
        [
            self.get("x").unwrap_or(0.0),
            self.get("y").unwrap_or(0.0),
            self.get("z").unwrap_or(0.0),
        ]
    }
}

impl<S: Into<String>, const N: usize> From<[(S, f64); N]> for StateVector {
    fn from(pairs: [(S, f64); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut v = StateVector::new();
        for (k, x) in iter {
            v.insert(k, x);
        }
        v
    }
}

impl fmt::Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v:.3}")?;
        }
        write!(f, "}}")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SensorSource
// ────────────────────────────────────────────────────────────────────────────

/// Where an observation came from.
///
/// Serialised as its snake_case tag (`"distance_sensor"`); unknown tags
/// round-trip through [`SensorSource::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorSource {
    /// Operator-entered ground truth.
    Manual,
    LineSensor,
    DistanceSensor,
    CameraVision,
    /// Derived by a reasoning step rather than measured.
    Inference,
    Other(String),
}

impl SensorSource {
    pub fn as_str(&self) -> &str {
        match self {
            SensorSource::Manual => "manual",
            SensorSource::LineSensor => "line_sensor",
            SensorSource::DistanceSensor => "distance_sensor",
            SensorSource::CameraVision => "camera_vision",
            SensorSource::Inference => "inference",
            SensorSource::Other(tag) => tag,
        }
    }

    /// Fixed reliability weight used when blending observation confidence.
    pub fn reliability_weight(&self) -> f64 {
        match self {
            SensorSource::Manual => 1.0,
            SensorSource::LineSensor => 0.95,
            SensorSource::DistanceSensor => 0.9,
            SensorSource::CameraVision => 0.8,
            SensorSource::Inference => 0.6,
            SensorSource::Other(_) => 0.5,
        }
    }
}

impl FromStr for SensorSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "manual" => SensorSource::Manual,
            "line_sensor" => SensorSource::LineSensor,
            "distance_sensor" => SensorSource::DistanceSensor,
            "camera_vision" => SensorSource::CameraVision,
            "inference" => SensorSource::Inference,
            other => SensorSource::Other(other.to_string()),
        })
    }
}

impl From<String> for SensorSource {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(source) => source,
            Err(never) => match never {},
        }
    }
}

impl From<SensorSource> for String {
    fn from(source: SensorSource) -> Self {
        source.as_str().to_string()
    }
}

impl fmt::Display for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JsonSchema for SensorSource {
    fn schema_name() -> String {
        "SensorSource".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Observation
// ────────────────────────────────────────────────────────────────────────────

/// Noise estimate assumed when the sensor layer does not report one.
pub const DEFAULT_NOISE: f64 = 0.05;

/// One sensor reading about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Stable identifier of the observed entity (e.g. `"wall-1"`).
    pub entity_id: String,
    /// Raw numeric state as reported by the sensor.
    pub state: StateVector,
    pub source: SensorSource,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    /// Standard deviation of the measurement noise, in state units.
    pub noise: f64,
    pub timestamp: Timestamp,
    /// Optional appearance descriptor used for identity association.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<f32>,
}

impl Observation {
    /// Build an observation with full confidence and [`DEFAULT_NOISE`].
    pub fn new(
        entity_id: impl Into<String>,
        state: StateVector,
        source: SensorSource,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            state,
            source,
            confidence: 1.0,
            noise: DEFAULT_NOISE,
            timestamp,
            features: Vec::new(),
        }
    }

    /// Set the detector confidence (clamped to `[0, 1]`; NaN reads as 0).
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = stats::clamp_unit(confidence);
        self
    }

    /// Set the noise estimate.  Negative values are mirrored; non-finite
    /// values fall back to [`DEFAULT_NOISE`].
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = if noise.is_finite() { noise.abs() } else { DEFAULT_NOISE };
        self
    }

    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.features = features;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Anomaly
// ────────────────────────────────────────────────────────────────────────────

/// Category of a temporal discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// The entity moved further than its kinematics allow.
    PositionJump,
    /// The observation disagrees with the motion-model prediction.
    StateDiscontinuity,
    SuddenAppearance,
    SuddenDisappearance,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::PositionJump => "position_jump",
            AnomalyKind::StateDiscontinuity => "state_discontinuity",
            AnomalyKind::SuddenAppearance => "sudden_appearance",
            AnomalyKind::SuddenDisappearance => "sudden_disappearance",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of a flagged temporal discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub kind: AnomalyKind,
    pub entity_id: String,
    pub timestamp: Timestamp,
    /// What the model believed (or predicted) before the observation.
    pub expected: Option<StateVector>,
    /// What was actually observed.
    pub actual: Option<StateVector>,
    /// How far past its trigger level the anomaly is (`> 1` means over).
    pub significance: f64,
    pub description: String,
}

impl Anomaly {
    pub fn new(
        kind: AnomalyKind,
        entity_id: impl Into<String>,
        timestamp: Timestamp,
        significance: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity_id: entity_id.into(),
            timestamp,
            expected: None,
            actual: None,
            significance,
            description: description.into(),
        }
    }

    pub fn with_states(mut self, expected: Option<StateVector>, actual: Option<StateVector>) -> Self {
        self.expected = expected;
        self.actual = actual;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BoundedLog
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity ring log; pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `item`, returning the evicted entry if the log was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.entries.retain(f);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for the world-model workspace.
///
/// Data anomalies are never errors; only configuration problems and contract
/// violations by the caller end up here.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldError {
    #[error("Invalid configuration: {field} {details}")]
    InvalidConfig { field: String, details: String },

    #[error("Cannot fuse an empty set of observations")]
    EmptyFusion,

    #[error("World model for device '{0}' is not running")]
    NotRunning(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reject `value` unless it lies in `[min, max]`.
pub fn ensure_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), WorldError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(WorldError::InvalidConfig {
            field: field.to_string(),
            details: format!("= {value} is outside [{min}, {max}]"),
        })
    }
}

/// Reject `value` unless it is finite and strictly positive.
pub fn ensure_positive(field: &str, value: f64) -> Result<(), WorldError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(WorldError::InvalidConfig {
            field: field.to_string(),
            details: format!("= {value} must be > 0"),
        })
    }
}

/// Reject `value` unless it is finite and `>= 0`.
pub fn ensure_non_negative(field: &str, value: f64) -> Result<(), WorldError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(WorldError::InvalidConfig {
            field: field.to_string(),
            details: format!("= {value} must be >= 0"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── StateVector ─────────────────────────────────────────────────────────

    #[test]
    fn non_finite_fields_are_dropped() {
        let mut v = StateVector::new();
        assert!(v.insert("x", 1.0));
        assert!(!v.insert("y", f64::NAN));
        assert!(!v.insert("z", f64::INFINITY));
        assert_eq!(v.len(), 1);
        assert_eq!(v.get("y"), None);
    }

    #[test]
    fn distance_uses_shared_fields_only() {
        let a = StateVector::from([("x", 0.0), ("y", 0.0), ("temp", 20.0)]);
        let b = StateVector::from([("x", 3.0), ("y", 4.0)]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
        let c = StateVector::from([("w", 1.0)]);
        assert_eq!(a.distance(&c), 0.0);
    }

    #[test]
    fn blend_mixes_shared_and_adopts_new_fields() {
        let old = StateVector::from([("x", 0.0), ("keep", 7.0)]);
        let new = StateVector::from([("x", 1.0), ("y", 2.0)]);
        let out = old.blend(&new, 0.3);
        assert!((out.get("x").unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(out.get("y"), Some(2.0));
        assert_eq!(out.get("keep"), Some(7.0));
    }

    #[test]
    fn extrapolate_applies_rate_per_field() {
        let pos = StateVector::from([("x", 1.0), ("y", 2.0)]);
        let vel = StateVector::from([("x", 0.5)]);
        let out = pos.extrapolate(&vel, 2.0);
        assert_eq!(out.get("x"), Some(2.0));
        assert_eq!(out.get("y"), Some(2.0));
    }

    #[test]
    fn state_vector_serializes_as_plain_object() {
        let v = StateVector::from([("x", 1.0), ("y", 0.5)]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"x":1.0,"y":0.5}"#);
    }

    // ── SensorSource ────────────────────────────────────────────────────────

    #[test]
    fn sensor_source_tags_roundtrip() {
        for tag in ["manual", "line_sensor", "distance_sensor", "camera_vision", "inference", "lidar"] {
            let source: SensorSource = tag.parse().unwrap();
            assert_eq!(source.as_str(), tag);
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{tag}\""));
            let back: SensorSource = serde_json::from_str(&json).unwrap();
            assert_eq!(back, source);
        }
    }

    #[test]
    fn reliability_weights_are_ordered() {
        let ordered = [
            SensorSource::Manual,
            SensorSource::LineSensor,
            SensorSource::DistanceSensor,
            SensorSource::CameraVision,
            SensorSource::Inference,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].reliability_weight() > pair[1].reliability_weight());
        }
    }

    // ── Observation ─────────────────────────────────────────────────────────

    #[test]
    fn observation_builder_sanitises_inputs() {
        let obs = Observation::new("a", StateVector::new(), SensorSource::Manual, Timestamp(0))
            .with_confidence(1.7)
            .with_noise(-0.2);
        assert_eq!(obs.confidence, 1.0);
        assert!((obs.noise - 0.2).abs() < 1e-12);

        let obs = obs.with_confidence(f64::NAN).with_noise(f64::NAN);
        assert_eq!(obs.confidence, 0.0);
        assert_eq!(obs.noise, DEFAULT_NOISE);
    }

    // ── BoundedLog ──────────────────────────────────────────────────────────

    #[test]
    fn bounded_log_evicts_oldest_first() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(log.recent(2).copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(log.latest(), Some(&4));
    }

    #[test]
    fn bounded_log_zero_capacity_holds_one() {
        let mut log = BoundedLog::new(0);
        log.push("a");
        assert_eq!(log.push("b"), Some("a"));
        assert_eq!(log.len(), 1);
    }

    // ── Timestamp ───────────────────────────────────────────────────────────

    #[test]
    fn timestamp_arithmetic() {
        let t0 = Timestamp::from_millis(1_000);
        let t1 = t0.plus_millis(2_500);
        assert_eq!(t1.millis_since(t0), 2_500);
        assert!((t1.seconds_since(t0) - 2.5).abs() < 1e-12);
        assert_eq!(Timestamp::from_secs_f64(1.5), Timestamp(1_500));
    }

    #[test]
    fn extreme_timestamps_saturate() {
        assert_eq!(Timestamp(i64::MAX).plus_millis(1), Timestamp(i64::MAX));
        assert_eq!(Timestamp(i64::MIN).plus_millis(-1), Timestamp(i64::MIN));
        assert_eq!(Timestamp(i64::MIN).millis_since(Timestamp(1)), i64::MIN);
        assert_eq!(Timestamp(i64::MAX).millis_since(Timestamp(-1)), i64::MAX);
        assert!(Timestamp(i64::MAX).seconds_since(Timestamp(i64::MIN)) > 0.0);
    }

    // ── Errors ──────────────────────────────────────────────────────────────

    #[test]
    fn range_helpers_reject_out_of_range_values() {
        assert!(ensure_range("alpha", 0.5, 0.0, 1.0).is_ok());
        assert!(ensure_range("alpha", 1.5, 0.0, 1.0).is_err());
        assert!(ensure_range("alpha", f64::NAN, 0.0, 1.0).is_err());
        assert!(ensure_positive("rate", 0.0).is_err());
        assert!(ensure_non_negative("rate", 0.0).is_ok());
    }

    #[test]
    fn world_error_display() {
        let err = ensure_positive("anomaly_threshold", -1.0).unwrap_err();
        assert!(err.to_string().contains("anomaly_threshold"));
        assert!(WorldError::NotRunning("robot-1".into()).to_string().contains("robot-1"));
    }
}
