//! Object Identity Tracker.
//!
//! Assigns persistent [`TrackId`]s to detections and keeps them stable across
//! time, occlusion and short losses of sight.
//!
//! ## Association
//!
//! Each cycle every live track (`New`, `Tracked`, `Occluded`) is scored
//! against every detection:
//!
//! ```text
//! cost = w_pos · min(d / gate, 1) + w_app · (1 − cos(features)) + w_label · [labels differ]
//! ```
//!
//! where `d` is the distance between the detection and the track's
//! constant-velocity prediction.  A pair is a candidate when `d ≤ gate` or
//! both sides carry the same label, and is accepted when `cost ≤ max_cost`.
//! With `strict_labels` a pair whose labels differ is never a candidate.
//! Candidates are assigned greedily in ascending `(cost, track id,
//! detection index)` order, so the outcome is fully deterministic.
//!
//! ## Lifecycle
//!
//! ```text
//! New ──(confirm_hits)──▶ Tracked ──(unseen)──▶ Occluded ──(lost_after)──▶ Lost ──(expire_after)──▶ removed
//!                            ▲                      │                       │
//!                            └──────(matched)───────┘◀──(re-identified)─────┘
//! ```
//!
//! A detection left unmatched is first offered to `Lost` tracks for
//! re-identification (appearance cosine ≥ `reid_threshold`); only then does
//! it open a new track.  Every transition is recorded as a
//! [`TrackingEvent`].

use std::collections::BTreeMap;
use std::fmt;

use cogworld_types::stats::clamp_unit;
use cogworld_types::{
    BoundedLog, Observation, Timestamp, WorldError, ensure_non_negative, ensure_positive,
    ensure_range,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Association gate on predicted distance (state units).  Default `2.0`.
    pub gate_distance: f64,
    /// Default `0.6`.
    pub position_weight: f64,
    /// Default `0.3`.
    pub appearance_weight: f64,
    /// Default `0.1`.
    pub label_weight: f64,
    /// Treat labels as identities: detections never associate with a track
    /// carrying a different label.  When `false` a mismatch only costs
    /// `label_weight`.  Default `true`.
    pub strict_labels: bool,
    /// Highest acceptable association cost.  Default `1.0`.
    pub max_cost: f64,
    /// Matches needed before a `New` track is confirmed.  Default `2`.
    pub confirm_hits: u32,
    /// Silence (ms) before a track counts as occluded.  Default `300`.
    pub occlusion_after_ms: i64,
    /// Silence (ms) before a track counts as lost.  Default `1000`.
    pub lost_after_ms: i64,
    /// Silence (ms) before a lost track is dropped.  Default `5000`.
    pub expire_after_ms: i64,
    /// Cosine similarity needed to re-identify a lost track.  Default `0.85`.
    pub reid_threshold: f64,
    /// Weight of the existing descriptor in the feature EMA.  Default `0.7`.
    pub feature_smoothing: f64,
    /// Tracking events retained.  Default `200`.
    pub max_events: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gate_distance: 2.0,
            position_weight: 0.6,
            appearance_weight: 0.3,
            label_weight: 0.1,
            strict_labels: true,
            max_cost: 1.0,
            confirm_hits: 2,
            occlusion_after_ms: 300,
            lost_after_ms: 1_000,
            expire_after_ms: 5_000,
            reid_threshold: 0.85,
            feature_smoothing: 0.7,
            max_events: 200,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        ensure_positive("tracker.gate_distance", self.gate_distance)?;
        ensure_non_negative("tracker.position_weight", self.position_weight)?;
        ensure_non_negative("tracker.appearance_weight", self.appearance_weight)?;
        ensure_non_negative("tracker.label_weight", self.label_weight)?;
        ensure_positive("tracker.max_cost", self.max_cost)?;
        ensure_positive("tracker.confirm_hits", self.confirm_hits as f64)?;
        ensure_positive("tracker.occlusion_after_ms", self.occlusion_after_ms as f64)?;
        ensure_range(
            "tracker.lost_after_ms",
            self.lost_after_ms as f64,
            self.occlusion_after_ms as f64,
            f64::MAX,
        )?;
        ensure_range(
            "tracker.expire_after_ms",
            self.expire_after_ms as f64,
            self.lost_after_ms as f64,
            f64::MAX,
        )?;
        ensure_range("tracker.reid_threshold", self.reid_threshold, -1.0, 1.0)?;
        ensure_range("tracker.feature_smoothing", self.feature_smoothing, 0.0, 1.0)?;
        ensure_positive("tracker.max_events", self.max_events as f64)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Persistent identity handed out by the tracker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// One positional detection fed to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub position: [f64; 3],
    /// Appearance descriptor; may be empty.
    #[serde(default)]
    pub features: Vec<f32>,
    /// Class or identity hint.
    pub label: Option<String>,
    pub confidence: f64,
    pub timestamp: Timestamp,
}

impl Detection {
    pub fn new(position: [f64; 3], timestamp: Timestamp) -> Self {
        Self {
            position,
            features: Vec::new(),
            label: None,
            confidence: 1.0,
            timestamp,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.features = features;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }
}

impl From<&Observation> for Detection {
    /// The entity id becomes the label, so observations of the same entity
    /// keep associating even after a jump outside the gate.
    fn from(obs: &Observation) -> Self {
        Self {
            position: obs.state.xyz(),
            features: obs.features.clone(),
            label: Some(obs.entity_id.clone()),
            confidence: obs.confidence,
            timestamp: obs.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Seen fewer than `confirm_hits` times.
    New,
    Tracked,
    /// Briefly unseen; still associated normally.
    Occluded,
    /// Unseen for long; only re-identification can revive it.
    Lost,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackState::New => "new",
            TrackState::Tracked => "tracked",
            TrackState::Occluded => "occluded",
            TrackState::Lost => "lost",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub label: Option<String>,
    pub position: [f64; 3],
    /// Units per second.
    pub velocity: [f64; 3],
    /// Smoothed appearance descriptor.
    pub features: Vec<f32>,
    pub state: TrackState,
    pub hits: u32,
    pub created_at: Timestamp,
    pub last_seen: Timestamp,
    pub confidence: f64,
}

impl Track {
    /// Constant-velocity position estimate at `at`.
    pub fn predicted_position(&self, at: Timestamp) -> [f64; 3] {
        let dt = at.seconds_since(self.last_seen).max(0.0);
        [
            self.position[0] + self.velocity[0] * dt,
            self.position[1] + self.velocity[1] * dt,
            self.position[2] + self.velocity[2] * dt,
        ]
    }

    pub fn is_active(&self) -> bool {
        self.state != TrackState::Lost
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingEventKind {
    Created,
    Updated,
    Confirmed,
    Occluded,
    Lost,
    ReIdentified,
    Expired,
}

impl fmt::Display for TrackingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackingEventKind::Created => "created",
            TrackingEventKind::Updated => "updated",
            TrackingEventKind::Confirmed => "confirmed",
            TrackingEventKind::Occluded => "occluded",
            TrackingEventKind::Lost => "lost",
            TrackingEventKind::ReIdentified => "re_identified",
            TrackingEventKind::Expired => "expired",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub kind: TrackingEventKind,
    pub track_id: TrackId,
    pub label: Option<String>,
    pub timestamp: Timestamp,
    pub position: [f64; 3],
}

/// Result of one association cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    /// Track assigned to each detection, by detection index.
    pub assignments: Vec<TrackId>,
    pub events: Vec<TrackingEvent>,
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

/// Cosine similarity in `[-1, 1]`; `None` when either vector is empty, the
/// lengths differ, or a vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn same_label(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

fn labels_conflict(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x != y)
}

// ────────────────────────────────────────────────────────────────────────────
// ObjectTracker
// ────────────────────────────────────────────────────────────────────────────

/// Greedy nearest-neighbour identity tracker.
///
/// # Example
///
/// ```rust
/// use cogworld_perception::tracker::{Detection, ObjectTracker, TrackState};
/// use cogworld_types::Timestamp;
///
/// let mut tracker = ObjectTracker::default();
/// let (a, _) = tracker.observe(Detection::new([0.0, 0.0, 0.0], Timestamp(0)));
/// let (b, _) = tracker.observe(Detection::new([0.1, 0.0, 0.0], Timestamp(100)));
/// assert_eq!(a, b);
/// assert_eq!(tracker.get(a).unwrap().state, TrackState::Tracked);
/// ```
#[derive(Debug, Clone)]
pub struct ObjectTracker {
    config: TrackerConfig,
    tracks: BTreeMap<TrackId, Track>,
    events: BoundedLog<TrackingEvent>,
    next_id: u64,
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::with_valid_config(TrackerConfig::default())
    }
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: TrackerConfig) -> Self {
        Self {
            events: BoundedLog::new(config.max_events),
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Process one frame of detections captured at `now`.
    ///
    /// Live tracks left unmatched by this frame become `Occluded`; ageing is
    /// applied afterwards so long-unseen tracks move on to `Lost` or expire.
    pub fn update(&mut self, detections: &[Detection], now: Timestamp) -> TrackingUpdate {
        let mut events = Vec::new();
        let (assigned, matched_tracks) = self.associate(detections, &mut events);

        let unmatched: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| {
                matches!(t.state, TrackState::New | TrackState::Tracked)
                    && !matched_tracks.contains(&t.id)
            })
            .map(|t| t.id)
            .collect();
        for id in unmatched {
            self.transition(id, TrackState::Occluded, TrackingEventKind::Occluded, now, &mut events);
        }

        let mut assignments = Vec::with_capacity(detections.len());
        for (idx, det) in detections.iter().enumerate() {
            let id = match assigned.get(&idx) {
                Some(id) => *id,
                None => self.reidentify_or_create(det, &mut events),
            };
            assignments.push(id);
        }

        events.extend(self.age(now));
        TrackingUpdate { assignments, events }
    }

    /// Associate a single detection without ageing the other tracks.
    pub fn observe(&mut self, detection: Detection) -> (TrackId, Vec<TrackingEvent>) {
        let mut events = Vec::new();
        let detections = std::slice::from_ref(&detection);
        let (assigned, _) = self.associate(detections, &mut events);
        let id = match assigned.get(&0) {
            Some(id) => *id,
            None => self.reidentify_or_create(&detection, &mut events),
        };
        (id, events)
    }

    /// Advance lifecycle states by silence duration and drop expired tracks.
    pub fn age(&mut self, now: Timestamp) -> Vec<TrackingEvent> {
        let mut events = Vec::new();
        let mut transitions = Vec::new();
        let mut expired = Vec::new();

        for track in self.tracks.values() {
            let silent = now.millis_since(track.last_seen);
            if silent > self.config.expire_after_ms {
                expired.push(track.id);
            } else if silent > self.config.lost_after_ms && track.state != TrackState::Lost {
                transitions.push((track.id, TrackState::Lost, TrackingEventKind::Lost));
            } else if silent > self.config.occlusion_after_ms
                && matches!(track.state, TrackState::New | TrackState::Tracked)
            {
                transitions.push((track.id, TrackState::Occluded, TrackingEventKind::Occluded));
            }
        }

        for (id, state, kind) in transitions {
            self.transition(id, state, kind, now, &mut events);
        }
        for id in expired {
            if let Some(track) = self.tracks.remove(&id) {
                debug!(track = %id, "track expired");
                self.emit(&track, TrackingEventKind::Expired, now, &mut events);
            }
        }
        events
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Most recently seen track carrying `label`.
    pub fn find_by_label(&self, label: &str) -> Option<&Track> {
        self.tracks
            .values()
            .filter(|t| t.label.as_deref() == Some(label))
            .max_by_key(|t| (t.last_seen, t.id))
    }

    /// All tracks ordered by id.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Number of tracks that are not `Lost`.
    pub fn active_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Remove every track carrying `label`.
    pub fn forget_label(&mut self, label: &str) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|_, t| t.label.as_deref() != Some(label));
        before - self.tracks.len()
    }

    /// The newest `n` events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<&TrackingEvent> {
        self.events.recent(n).collect()
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn cost(&self, track: &Track, det: &Detection) -> Option<f64> {
        if track.state == TrackState::Lost {
            return None;
        }
        let cfg = &self.config;
        let d = distance(track.predicted_position(det.timestamp), det.position);
        if d > cfg.gate_distance && !same_label(&track.label, &det.label) {
            return None;
        }
        let conflict = labels_conflict(&track.label, &det.label);
        if conflict && cfg.strict_labels {
            return None;
        }
        let appearance = cosine_similarity(&track.features, &det.features)
            .map(|sim| 1.0 - sim.max(0.0))
            .unwrap_or(0.0);
        let label = if conflict { 1.0 } else { 0.0 };
        let cost = cfg.position_weight * (d / cfg.gate_distance).min(1.0)
            + cfg.appearance_weight * appearance
            + cfg.label_weight * label;
        (cost <= cfg.max_cost).then_some(cost)
    }

    /// Greedy assignment.  Returns detection index → track and the set of
    /// matched tracks.
    fn associate(
        &mut self,
        detections: &[Detection],
        events: &mut Vec<TrackingEvent>,
    ) -> (BTreeMap<usize, TrackId>, Vec<TrackId>) {
        let mut candidates: Vec<(f64, TrackId, usize)> = Vec::new();
        for track in self.tracks.values() {
            for (idx, det) in detections.iter().enumerate() {
                if let Some(cost) = self.cost(track, det) {
                    candidates.push((cost, track.id, idx));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut assigned = BTreeMap::new();
        let mut matched = Vec::new();
        for (cost, id, idx) in candidates {
            if assigned.contains_key(&idx) || matched.contains(&id) {
                continue;
            }
            debug!(track = %id, detection = idx, cost, "associated");
            self.apply_match(id, &detections[idx], TrackingEventKind::Updated, events);
            assigned.insert(idx, id);
            matched.push(id);
        }
        (assigned, matched)
    }

    fn apply_match(
        &mut self,
        id: TrackId,
        det: &Detection,
        kind: TrackingEventKind,
        events: &mut Vec<TrackingEvent>,
    ) {
        let confirm_hits = self.config.confirm_hits;
        let keep = self.config.feature_smoothing;
        let Some(track) = self.tracks.get_mut(&id) else {
            return;
        };

        let dt = det.timestamp.seconds_since(track.last_seen);
        if dt > 0.0 && kind != TrackingEventKind::ReIdentified {
            for axis in 0..3 {
                let measured = (det.position[axis] - track.position[axis]) / dt;
                track.velocity[axis] = if track.hits > 1 {
                    0.5 * track.velocity[axis] + 0.5 * measured
                } else {
                    measured
                };
            }
        } else if kind == TrackingEventKind::ReIdentified {
            track.velocity = [0.0; 3];
        }
        track.position = det.position;
        if track.features.len() == det.features.len() && !det.features.is_empty() {
            for (old, new) in track.features.iter_mut().zip(&det.features) {
                *old = (keep as f32) * *old + (1.0 - keep as f32) * *new;
            }
        } else if !det.features.is_empty() {
            track.features = det.features.clone();
        }
        if track.label.is_none() {
            track.label = det.label.clone();
        }
        track.hits += 1;
        track.last_seen = track.last_seen.max(det.timestamp);
        track.confidence = clamp_unit(0.5 * track.confidence + 0.5 * det.confidence);

        let previous = track.state;
        track.state = match previous {
            TrackState::New if track.hits >= confirm_hits => TrackState::Tracked,
            TrackState::New => TrackState::New,
            _ => TrackState::Tracked,
        };
        let confirmed = previous == TrackState::New && track.state == TrackState::Tracked;
        let snapshot = track.clone();

        self.emit(&snapshot, kind, det.timestamp, events);
        if confirmed {
            info!(track = %id, label = ?snapshot.label, "track confirmed");
            self.emit(&snapshot, TrackingEventKind::Confirmed, det.timestamp, events);
        }
    }

    fn reidentify_or_create(&mut self, det: &Detection, events: &mut Vec<TrackingEvent>) -> TrackId {
        let threshold = self.config.reid_threshold;
        let best = self
            .tracks
            .values()
            .filter(|t| t.state == TrackState::Lost && !labels_conflict(&t.label, &det.label))
            .filter_map(|t| {
                let score = match cosine_similarity(&t.features, &det.features) {
                    Some(sim) if sim >= threshold => sim,
                    Some(_) => return None,
                    None if t.features.is_empty()
                        && det.features.is_empty()
                        && same_label(&t.label, &det.label) =>
                    {
                        threshold
                    }
                    None => return None,
                };
                Some((score, t.id))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

        if let Some((score, id)) = best {
            info!(track = %id, similarity = score, "track re-identified");
            self.apply_match(id, det, TrackingEventKind::ReIdentified, events);
            return id;
        }

        let id = TrackId(self.next_id);
        self.next_id += 1;
        let state = if self.config.confirm_hits <= 1 { TrackState::Tracked } else { TrackState::New };
        let track = Track {
            id,
            label: det.label.clone(),
            position: det.position,
            velocity: [0.0; 3],
            features: det.features.clone(),
            state,
            hits: 1,
            created_at: det.timestamp,
            last_seen: det.timestamp,
            confidence: det.confidence,
        };
        debug!(track = %id, label = ?det.label, "track created");
        self.emit(&track, TrackingEventKind::Created, det.timestamp, events);
        self.tracks.insert(id, track);
        id
    }

    fn transition(
        &mut self,
        id: TrackId,
        state: TrackState,
        kind: TrackingEventKind,
        now: Timestamp,
        events: &mut Vec<TrackingEvent>,
    ) {
        let Some(track) = self.tracks.get_mut(&id) else {
            return;
        };
        if track.state == state {
            return;
        }
        track.state = state;
        let snapshot = track.clone();
        debug!(track = %id, state = %state, "track transition");
        self.emit(&snapshot, kind, now, events);
    }

    fn emit(
        &mut self,
        track: &Track,
        kind: TrackingEventKind,
        at: Timestamp,
        events: &mut Vec<TrackingEvent>,
    ) {
        let event = TrackingEvent {
            kind,
            track_id: track.id,
            label: track.label.clone(),
            timestamp: at,
            position: track.position,
        };
        self.events.push(event.clone());
        events.push(event);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f64, t: i64) -> Detection {
        Detection::new([x, 0.0, 0.0], Timestamp(t))
    }

    fn kinds(events: &[TrackingEvent]) -> Vec<TrackingEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    // ── association ─────────────────────────────────────────────────────────

    #[test]
    fn nearby_detections_keep_identity_and_confirm() {
        let mut tracker = ObjectTracker::default();
        let (a, events) = tracker.observe(det(0.0, 0));
        assert_eq!(kinds(&events), vec![TrackingEventKind::Created]);
        assert_eq!(tracker.get(a).unwrap().state, TrackState::New);

        let (b, events) = tracker.observe(det(0.2, 100));
        assert_eq!(a, b);
        assert_eq!(
            kinds(&events),
            vec![TrackingEventKind::Updated, TrackingEventKind::Confirmed]
        );
        let track = tracker.get(a).unwrap();
        assert_eq!(track.state, TrackState::Tracked);
        assert!((track.velocity[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn far_detection_opens_new_track() {
        let mut tracker = ObjectTracker::default();
        let (a, _) = tracker.observe(det(0.0, 0));
        let (b, _) = tracker.observe(det(10.0, 100));
        assert_ne!(a, b);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn matching_label_associates_beyond_gate() {
        let mut tracker = ObjectTracker::default();
        let (a, _) = tracker.observe(det(0.0, 0).with_label("box"));
        let (b, _) = tracker.observe(det(10.0, 100).with_label("box"));
        assert_eq!(a, b);
    }

    #[test]
    fn conflicting_labels_prefer_their_own_track() {
        let mut tracker = ObjectTracker::default();
        let frame = [det(0.0, 0).with_label("cup"), det(0.5, 0).with_label("plate")];
        let first = tracker.update(&frame, Timestamp(0));

        let swapped = [det(0.45, 100).with_label("plate"), det(0.05, 100).with_label("cup")];
        let second = tracker.update(&swapped, Timestamp(100));
        assert_eq!(second.assignments[0], first.assignments[1]);
        assert_eq!(second.assignments[1], first.assignments[0]);
    }

    #[test]
    fn strict_labels_keep_neighbours_apart() {
        let mut strict = ObjectTracker::default();
        let (a, _) = strict.observe(det(0.0, 0).with_label("cup"));
        let (b, _) = strict.observe(det(0.1, 100).with_label("mug"));
        assert_ne!(a, b);
        assert_eq!(strict.len(), 2);

        let mut soft = ObjectTracker::new(TrackerConfig {
            strict_labels: false,
            ..TrackerConfig::default()
        })
        .unwrap();
        let (first, _) = soft.observe(det(0.0, 0).with_label("cup"));
        let (second, _) = soft.observe(det(0.1, 100).with_label("mug"));
        assert_eq!(first, second);
        assert_eq!(soft.len(), 1);
    }

    #[test]
    fn frame_assignment_is_greedy_by_cost() {
        let mut tracker = ObjectTracker::default();
        let first = tracker.update(&[det(0.0, 0), det(1.0, 0)], Timestamp(0));
        let second = tracker.update(&[det(1.05, 100), det(0.05, 100)], Timestamp(100));
        assert_eq!(second.assignments, vec![first.assignments[1], first.assignments[0]]);
    }

    #[test]
    fn appearance_breaks_positional_ties() {
        let mut tracker = ObjectTracker::default();
        let red = vec![1.0, 0.0, 0.0];
        let blue = vec![0.0, 0.0, 1.0];
        let first = tracker.update(
            &[det(0.0, 0).with_features(red.clone()), det(0.4, 0).with_features(blue.clone())],
            Timestamp(0),
        );
        let second = tracker.update(
            &[det(0.2, 100).with_features(blue), det(0.2, 100).with_features(red)],
            Timestamp(100),
        );
        assert_eq!(second.assignments[0], first.assignments[1]);
        assert_eq!(second.assignments[1], first.assignments[0]);
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    #[test]
    fn unmatched_track_in_frame_becomes_occluded() {
        let mut tracker = ObjectTracker::default();
        let first = tracker.update(&[det(0.0, 0), det(5.0, 0)], Timestamp(0));
        let update = tracker.update(&[det(0.1, 100)], Timestamp(100));
        let occluded: Vec<_> = update
            .events
            .iter()
            .filter(|e| e.kind == TrackingEventKind::Occluded)
            .collect();
        assert_eq!(occluded.len(), 1);
        assert_eq!(occluded[0].track_id, first.assignments[1]);
    }

    #[test]
    fn ageing_walks_through_occluded_lost_expired() {
        let mut tracker = ObjectTracker::default();
        let (id, _) = tracker.observe(det(0.0, 0));
        tracker.observe(det(0.0, 100));

        assert_eq!(kinds(&tracker.age(Timestamp(500))), vec![TrackingEventKind::Occluded]);
        assert_eq!(kinds(&tracker.age(Timestamp(1_200))), vec![TrackingEventKind::Lost]);
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.age(Timestamp(2_000)).is_empty());
        assert_eq!(kinds(&tracker.age(Timestamp(5_200))), vec![TrackingEventKind::Expired]);
        assert!(tracker.get(id).is_none());
    }

    #[test]
    fn occluded_track_recovers_on_match() {
        let mut tracker = ObjectTracker::default();
        let (id, _) = tracker.observe(det(0.0, 0));
        tracker.observe(det(0.0, 100));
        tracker.age(Timestamp(500));
        assert_eq!(tracker.get(id).unwrap().state, TrackState::Occluded);

        let (again, _) = tracker.observe(det(0.1, 600));
        assert_eq!(again, id);
        assert_eq!(tracker.get(id).unwrap().state, TrackState::Tracked);
    }

    #[test]
    fn lost_track_reidentified_by_appearance() {
        let mut tracker = ObjectTracker::default();
        let look = vec![0.9, 0.1, 0.3];
        let (id, _) = tracker.observe(det(0.0, 0).with_features(look.clone()));
        tracker.observe(det(0.0, 100).with_features(look.clone()));
        tracker.age(Timestamp(2_000));
        assert_eq!(tracker.get(id).unwrap().state, TrackState::Lost);

        let (again, events) = tracker.observe(det(8.0, 2_500).with_features(vec![0.88, 0.12, 0.3]));
        assert_eq!(again, id);
        assert_eq!(kinds(&events), vec![TrackingEventKind::ReIdentified]);
        assert_eq!(tracker.get(id).unwrap().state, TrackState::Tracked);
    }

    #[test]
    fn lost_track_not_reidentified_by_different_appearance() {
        let mut tracker = ObjectTracker::default();
        let (id, _) = tracker.observe(det(0.0, 0).with_features(vec![1.0, 0.0]));
        tracker.age(Timestamp(2_000));
        let (other, events) = tracker.observe(det(8.0, 2_500).with_features(vec![0.0, 1.0]));
        assert_ne!(other, id);
        assert_eq!(kinds(&events), vec![TrackingEventKind::Created]);
    }

    #[test]
    fn lost_track_reidentified_by_label_without_descriptors() {
        let mut tracker = ObjectTracker::default();
        let (id, _) = tracker.observe(det(0.0, 0).with_label("door"));
        tracker.age(Timestamp(2_000));
        let (again, _) = tracker.observe(det(0.0, 2_500).with_label("door"));
        assert_eq!(again, id);
    }

    #[test]
    fn events_are_logged() {
        let mut tracker = ObjectTracker::default();
        tracker.observe(det(0.0, 0));
        tracker.observe(det(0.0, 100));
        assert_eq!(tracker.recent_events(10).len(), 3);
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    #[test]
    fn cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_configuration_rejected() {
        let bad = TrackerConfig {
            lost_after_ms: 100,
            occlusion_after_ms: 300,
            ..TrackerConfig::default()
        };
        assert!(ObjectTracker::new(bad).is_err());
    }

    #[test]
    fn detection_from_observation_uses_entity_as_label() {
        use cogworld_types::{SensorSource, StateVector};
        let obs = Observation::new(
            "wall-1",
            StateVector::from([("x", 1.0), ("y", 2.0)]),
            SensorSource::CameraVision,
            Timestamp(5),
        );
        let det = Detection::from(&obs);
        assert_eq!(det.position, [1.0, 2.0, 0.0]);
        assert_eq!(det.label.as_deref(), Some("wall-1"));
    }
}
