//! [`CognitiveWorldModel`] – the per-device aggregator.
//!
//! Every observation flows through the engines in a fixed order:
//!
//! 1. **Identify** – [`ObjectTracker`] assigns a persistent track.
//! 2. **Cohere** – [`TemporalCoherenceEngine`] smooths the state, updates
//!    velocity and flags kinematic anomalies.
//! 3. **Detect** – [`ChangeDetector`] tests each field against its rolling
//!    baseline.
//! 4. **Believe** – [`UncertaintyReasoner`] folds each field into a belief
//!    named `"<entity>.<field>"` (dots in the entity id escaped as `\.`),
//!    attributed to the observation's source.
//! 5. **Schedule** – [`SparseUpdateHandler`] learns the entity's cadence.
//!
//! [`tick`][CognitiveWorldModel::tick] advances the logical clock and
//! cascades the removal of forgotten entities into every engine.
//!
//! # Example
//!
//! ```rust
//! use cogworld_runtime::{CognitiveWorldModel, WorldModelConfig};
//! use cogworld_types::{Observation, SensorSource, StateVector, Timestamp};
//!
//! let mut model = CognitiveWorldModel::new("rover-1", &WorldModelConfig::default()).unwrap();
//! model.start(Timestamp(0));
//!
//! let obs = Observation::new(
//!     "wall-1",
//!     StateVector::from([("x", 1.0), ("y", 0.0), ("z", 0.0)]),
//!     SensorSource::DistanceSensor,
//!     Timestamp(0),
//! );
//! let outcome = model.process_observation(&obs).unwrap();
//! assert!(outcome.anomalies.is_empty());
//!
//! let snapshot = model.get_world_state(Timestamp(100));
//! assert_eq!(snapshot.entities.len(), 1);
//! ```

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use cogworld_belief::{
    ActionEvaluation, ActionProposal, BeliefState, CalibrationReport, FusionResult,
    SourceObservation, UncertaintyReasoner,
};
use cogworld_perception::change::{ChangeDetector, ChangeEvent};
use cogworld_perception::sparse::{InterpolatedState, SparseUpdateHandler};
use cogworld_perception::temporal::{TemporalCoherenceEngine, TemporalState};
use cogworld_perception::tracker::{Detection, ObjectTracker, TrackId, TrackState, TrackingEvent};
use cogworld_types::{Anomaly, Observation, Timestamp, WorldError};
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WorldModelConfig;

/// Entries per section of the cognitive analysis.
const ANALYSIS_RECENT: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Outcome types
// ─────────────────────────────────────────────────────────────────────────────

/// What one observation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationOutcome {
    pub entity_id: String,
    pub track_id: TrackId,
    /// Temporal state after the update.
    pub state: TemporalState,
    pub changes: Vec<ChangeEvent>,
    pub anomalies: Vec<Anomaly>,
    pub tracking_events: Vec<TrackingEvent>,
}

/// What one clock advance produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Entities forgotten by this tick, sorted.
    pub forgotten: Vec<String>,
    pub changes: Vec<ChangeEvent>,
    pub anomalies: Vec<Anomaly>,
    pub tracking_events: Vec<TrackingEvent>,
}

/// Everything known about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntitySnapshot {
    pub state: TemporalState,
    pub track_id: Option<TrackId>,
    pub track_state: Option<TrackState>,
    /// Per-field beliefs, keyed by field name.
    pub beliefs: BTreeMap<String, BeliefState>,
    /// Silent for longer than its cadence allows.
    pub stale: bool,
    /// Observation priority score; higher is more urgent.
    pub update_priority: Option<f64>,
}

/// Serializable picture of one device's world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorldSnapshot {
    pub device_id: String,
    pub timestamp: Timestamp,
    pub running: bool,
    pub entities: BTreeMap<String, EntitySnapshot>,
    /// Mean entity confidence; `0` for an empty world.
    pub overall_confidence: f64,
    pub anomaly_count: u64,
    pub change_count: u64,
    pub active_tracks: usize,
}

/// JSON schema of [`WorldSnapshot`] for display collaborators.
pub fn world_snapshot_schema() -> RootSchema {
    schemars::schema_for!(WorldSnapshot)
}

// ─────────────────────────────────────────────────────────────────────────────
// CognitiveWorldModel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct EntityLinks {
    track_id: TrackId,
    /// Field → belief target.
    belief_targets: BTreeMap<String, String>,
}

/// The five estimation engines of one device, driven as a unit.
pub struct CognitiveWorldModel {
    device_id: String,
    running: bool,
    started_at: Option<Timestamp>,
    temporal: TemporalCoherenceEngine,
    tracker: ObjectTracker,
    changes: ChangeDetector,
    sparse: SparseUpdateHandler,
    reasoner: UncertaintyReasoner,
    links: BTreeMap<String, EntityLinks>,
}

impl CognitiveWorldModel {
    /// Build a stopped model.  Fails if any config section is out of range.
    pub fn new(device_id: impl Into<String>, config: &WorldModelConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            device_id: device_id.into(),
            running: false,
            started_at: None,
            temporal: TemporalCoherenceEngine::new(config.temporal.clone())?,
            tracker: ObjectTracker::new(config.tracker.clone())?,
            changes: ChangeDetector::new(config.change.clone())?,
            sparse: SparseUpdateHandler::new(config.sparse.clone())?,
            reasoner: UncertaintyReasoner::new(config.reasoner.clone())?,
            links: BTreeMap::new(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn start(&mut self, now: Timestamp) {
        if self.running {
            debug!(device = %self.device_id, "world model already running");
            return;
        }
        self.running = true;
        self.started_at = Some(now);
        info!(device = %self.device_id, at = now.as_millis(), "world model started");
    }

    /// Stop accepting observations.  Engine state is kept.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!(device = %self.device_id, entities = self.temporal.len(), "world model stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Route one observation through tracking, temporal coherence, change
    /// detection, belief fusion and cadence learning.
    ///
    /// # Errors
    ///
    /// [`WorldError::NotRunning`] when the model has not been started.
    pub fn process_observation(&mut self, obs: &Observation) -> Result<ObservationOutcome, WorldError> {
        if !self.running {
            warn!(device = %self.device_id, entity = %obs.entity_id, "observation on stopped world model");
            return Err(WorldError::NotRunning(self.device_id.clone()));
        }
        let anomalies_before = self.temporal.anomaly_count();
        let changes_before = self.changes.change_count();
        let entity = obs.entity_id.as_str();

        let (track_id, tracking_events) = self.tracker.observe(Detection::from(obs));

        let first_sighting = self.temporal.get_state(entity).is_none();
        let state = self.temporal.observe(obs);

        if first_sighting {
            self.changes.entity_appeared(entity, &obs.state, obs.timestamp);
        }
        self.changes.observe_state(entity, &obs.state, obs.timestamp);

        let links = self.links.entry(entity.to_string()).or_insert_with(|| EntityLinks {
            track_id,
            belief_targets: BTreeMap::new(),
        });
        links.track_id = track_id;
        for (field, value) in obs.state.iter() {
            let target = belief_target(entity, field);
            if self
                .reasoner
                .update_belief(&target, obs.source.as_str(), value, obs.noise, obs.timestamp)
                .is_some()
            {
                links.belief_targets.insert(field.to_string(), target);
            }
        }

        self.sparse.record(entity, &state.current, obs.timestamp);
        if let Some(velocity) = &state.velocity {
            self.sparse.set_velocity(entity, velocity.clone());
        }
        self.sparse.set_confidence(entity, state.confidence);

        let outcome = ObservationOutcome {
            entity_id: entity.to_string(),
            track_id,
            state,
            changes: self.changes.changes_since(changes_before),
            anomalies: self.temporal.anomalies_since(anomalies_before),
            tracking_events,
        };
        debug!(
            device = %self.device_id,
            entity,
            track = %track_id,
            confidence = outcome.state.confidence,
            changes = outcome.changes.len(),
            anomalies = outcome.anomalies.len(),
            "observation processed"
        );
        Ok(outcome)
    }

    /// Flag an entity as out of view so that ticks decay it.
    pub fn mark_unobservable(&mut self, entity_id: &str) -> bool {
        self.temporal.mark_unobservable(entity_id)
    }

    /// Advance the logical clock.
    ///
    /// Decays temporal confidence, cascades the removal of forgotten entities
    /// into every engine (recording a disappearance for each), ages beliefs
    /// and tracks.  A stopped model does nothing.
    pub fn tick(&mut self, now: Timestamp) -> TickReport {
        if !self.running {
            debug!(device = %self.device_id, "tick on stopped world model ignored");
            return TickReport::default();
        }
        let anomalies_before = self.temporal.anomaly_count();
        let changes_before = self.changes.change_count();

        let forgotten = self.temporal.tick(now);
        for id in &forgotten {
            self.changes.entity_disappeared(id, now);
            self.sparse.remove(id);
            self.tracker.forget_label(id);
            if let Some(links) = self.links.remove(id) {
                for target in links.belief_targets.values() {
                    self.reasoner.remove_belief(target);
                }
            }
            info!(device = %self.device_id, entity = %id, "entity forgotten");
        }

        for state in self.temporal.get_all_entities() {
            self.sparse.set_confidence(&state.entity_id, state.confidence);
        }
        self.reasoner.decay_beliefs(now);
        let tracking_events = self.tracker.age(now);

        TickReport {
            forgotten,
            changes: self.changes.changes_since(changes_before),
            anomalies: self.temporal.anomalies_since(anomalies_before),
            tracking_events,
        }
    }

    // -------------------------------------------------------------------------
    // Reasoning pass-throughs
    // -------------------------------------------------------------------------

    /// Calibrate every source that reported `target` against a known truth.
    pub fn calibrate_sources(
        &mut self,
        target: &str,
        ground_truth: f64,
        observations: &[SourceObservation],
    ) -> CalibrationReport {
        self.reasoner.calibrate_sources(target, ground_truth, observations)
    }

    pub fn fuse_observations(&self, observations: &[SourceObservation]) -> Result<FusionResult, WorldError> {
        self.reasoner.fuse_observations(observations)
    }

    pub fn evaluate_action(&self, proposal: &ActionProposal) -> ActionEvaluation {
        self.reasoner.evaluate_action(proposal)
    }

    /// Best estimate of an entity at `at`, filling sensing gaps.
    pub fn interpolate(&self, entity_id: &str, at: Timestamp) -> Option<InterpolatedState> {
        self.sparse.interpolate_auto(entity_id, at)
    }

    // -------------------------------------------------------------------------
    // Engine accessors
    // -------------------------------------------------------------------------

    pub fn temporal(&self) -> &TemporalCoherenceEngine {
        &self.temporal
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn changes(&self) -> &ChangeDetector {
        &self.changes
    }

    pub fn sparse(&self) -> &SparseUpdateHandler {
        &self.sparse
    }

    pub fn reasoner(&self) -> &UncertaintyReasoner {
        &self.reasoner
    }

    /// Mutable reasoner access, e.g. to register sources with known trust.
    pub fn reasoner_mut(&mut self) -> &mut UncertaintyReasoner {
        &mut self.reasoner
    }

    // -------------------------------------------------------------------------
    // Outbound views
    // -------------------------------------------------------------------------

    pub fn get_world_state(&self, now: Timestamp) -> WorldSnapshot {
        let mut entities = BTreeMap::new();
        for state in self.temporal.get_all_entities() {
            let id = state.entity_id.as_str();
            let track = self
                .links
                .get(id)
                .and_then(|l| self.tracker.get(l.track_id))
                .or_else(|| self.tracker.find_by_label(id));
            let beliefs = self
                .links
                .get(id)
                .map(|l| {
                    l.belief_targets
                        .iter()
                        .filter_map(|(field, t)| Some((field.clone(), self.reasoner.get_belief(t)?.clone())))
                        .collect()
                })
                .unwrap_or_default();
            entities.insert(
                id.to_string(),
                EntitySnapshot {
                    state: state.clone(),
                    track_id: track.map(|t| t.id),
                    track_state: track.map(|t| t.state),
                    beliefs,
                    stale: self.sparse.is_stale(id, now),
                    update_priority: self.sparse.priority(id, now).map(|p| p.score),
                },
            );
        }

        let overall_confidence = if entities.is_empty() {
            0.0
        } else {
            entities.values().map(|e| e.state.confidence).sum::<f64>() / entities.len() as f64
        };

        WorldSnapshot {
            device_id: self.device_id.clone(),
            timestamp: now,
            running: self.running,
            entities,
            overall_confidence,
            anomaly_count: self.temporal.anomaly_count(),
            change_count: self.changes.change_count(),
            active_tracks: self.tracker.active_count(),
        }
    }

    /// Compact report for a reasoning layer: entity status, recent anomalies
    /// and changes, drift, source trust and the next entity worth observing.
    pub fn generate_cognitive_analysis(&self, now: Timestamp) -> String {
        let snapshot = self.get_world_state(now);
        let when = now
            .to_datetime()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| format!("{}ms", now.as_millis()));

        let mut out = format!("# World model {} @ {when}\n", self.device_id);
        out.push_str(&format!(
            "Status: {}, {} entities, overall confidence {:.2}, {} active tracks\n",
            if snapshot.running { "running" } else { "stopped" },
            snapshot.entities.len(),
            snapshot.overall_confidence,
            snapshot.active_tracks
        ));

        out.push_str("\n## Entities\n");
        if snapshot.entities.is_empty() {
            out.push_str("(none)\n");
        }
        for (id, entity) in &snapshot.entities {
            let state = &entity.state;
            out.push_str(&format!(
                "- {id}: {} conf {:.2} stab {:.2}",
                state.current, state.confidence, state.stability
            ));
            if let Some(v) = &state.velocity {
                out.push_str(&format!(" vel {v}"));
            }
            if let (Some(track), Some(track_state)) = (entity.track_id, entity.track_state) {
                out.push_str(&format!(" [{track} {track_state}]"));
            }
            if !state.is_observable {
                out.push_str(" [out of view]");
            } else if entity.stale {
                out.push_str(" [stale]");
            }
            out.push('\n');
        }

        out.push_str("\n## Recent anomalies\n");
        let anomalies = self.temporal.recent_anomalies(ANALYSIS_RECENT);
        if anomalies.is_empty() {
            out.push_str("(none)\n");
        }
        for anomaly in anomalies {
            out.push_str(&format!(
                "- [{}] {} x{:.1}: {}\n",
                anomaly.kind, anomaly.entity_id, anomaly.significance, anomaly.description
            ));
        }

        out.push_str("\n## Recent changes\n");
        let changes = self.changes.recent_changes(ANALYSIS_RECENT);
        if changes.is_empty() {
            out.push_str("(none)\n");
        }
        for change in changes {
            out.push_str(&format!("- [{}] {}\n", change.kind, change.description));
        }

        let drifting = self.changes.drifting_properties();
        if !drifting.is_empty() {
            out.push_str("\n## Drift\n");
            for drift in drifting {
                out.push_str(&format!(
                    "- {}.{}: {:+.4}/s (r² {:.2}, {} samples)\n",
                    drift.entity_id, drift.property, drift.drift_rate, drift.r_squared, drift.sample_count
                ));
            }
        }

        out.push_str("\n## Sources\n");
        let mut any_source = false;
        for source in self.reasoner.sources() {
            any_source = true;
            out.push_str(&format!(
                "- {}: trust {:.2}, reliability {:.2}{}\n",
                source.source_id,
                source.trust_level,
                source.reliability,
                if source.is_trusted { "" } else { " [untrusted]" }
            ));
        }
        if !any_source {
            out.push_str("(none)\n");
        }

        if let Some(next) = self.sparse.next_to_observe(now) {
            out.push_str(&format!(
                "\nNext to observe: {} ({}, score {:.2})\n",
                next.entity_id, next.reason, next.score
            ));
        }
        out
    }
}

/// `entity.field`, with `.` and `\` in the entity id backslash-escaped so
/// that the first unescaped dot always ends the entity.
fn belief_target(entity_id: &str, field: &str) -> String {
    let mut target = String::with_capacity(entity_id.len() + field.len() + 1);
    for c in entity_id.chars() {
        if matches!(c, '.' | '\\') {
            target.push('\\');
        }
        target.push(c);
    }
    target.push('.');
    target.push_str(field);
    target
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
