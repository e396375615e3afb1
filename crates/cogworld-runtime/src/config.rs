//! Configuration vault: one TOML file holding every engine's tuning.
//!
//! Missing sections and fields fall back to their documented defaults, so a
//! file only needs to name what it changes:
//!
//! ```toml
//! [temporal]
//! smoothing_factor = 0.5
//!
//! [reasoner]
//! min_trust_threshold = 0.4
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cogworld_belief::ReasonerConfig;
use cogworld_perception::change::ChangeConfig;
use cogworld_perception::sparse::SparseConfig;
use cogworld_perception::temporal::TemporalConfig;
use cogworld_perception::tracker::TrackerConfig;
use cogworld_types::WorldError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::telemetry::TelemetryConfig;

/// Tuning for every engine of one [`CognitiveWorldModel`][crate::CognitiveWorldModel].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldModelConfig {
    pub temporal: TemporalConfig,
    pub tracker: TrackerConfig,
    pub change: ChangeConfig,
    pub sparse: SparseConfig,
    pub reasoner: ReasonerConfig,
    pub telemetry: TelemetryConfig,
}

impl WorldModelConfig {
    /// Validate every section; the first failure wins.
    pub fn validate(&self) -> Result<(), WorldError> {
        self.temporal.validate()?;
        self.tracker.validate()?;
        self.change.validate()?;
        self.sparse.validate()?;
        self.reasoner.validate()
    }
}

/// `<dir>/cogworld.toml`.
pub fn config_path_in(dir: &Path) -> PathBuf {
    dir.join("cogworld.toml")
}

/// Load and validate the config at `path`, then apply environment
/// overrides.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<WorldModelConfig>, WorldError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| WorldError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: WorldModelConfig = toml::from_str(&raw)
        .map_err(|e| WorldError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    debug!(path = %path.display(), "world model config loaded");
    Ok(Some(cfg))
}

/// Apply `COGWORLD_*` overrides.  Unparseable values are ignored.
///
/// | Variable | Field |
/// |---|---|
/// | `COGWORLD_ANOMALY_THRESHOLD` | `temporal.anomaly_threshold` |
/// | `COGWORLD_MIN_CONFIDENCE` | `temporal.min_confidence` |
/// | `COGWORLD_SMOOTHING_FACTOR` | `temporal.smoothing_factor` |
/// | `COGWORLD_OUTLIER_THRESHOLD` | `reasoner.outlier_threshold` |
/// | `COGWORLD_MIN_TRUST_THRESHOLD` | `reasoner.min_trust_threshold` |
///
/// The telemetry section additionally honours `RUST_LOG`,
/// `COGWORLD_LOG_FORMAT` and `OTEL_EXPORTER_OTLP_ENDPOINT`.
pub fn apply_env_overrides(cfg: &mut WorldModelConfig) {
    if let Some(v) = env_f64("COGWORLD_ANOMALY_THRESHOLD") {
        cfg.temporal.anomaly_threshold = v;
    }
    if let Some(v) = env_f64("COGWORLD_MIN_CONFIDENCE") {
        cfg.temporal.min_confidence = v;
    }
    if let Some(v) = env_f64("COGWORLD_SMOOTHING_FACTOR") {
        cfg.temporal.smoothing_factor = v;
    }
    if let Some(v) = env_f64("COGWORLD_OUTLIER_THRESHOLD") {
        cfg.reasoner.outlier_threshold = v;
    }
    if let Some(v) = env_f64("COGWORLD_MIN_TRUST_THRESHOLD") {
        cfg.reasoner.min_trust_threshold = v;
    }
    cfg.telemetry.apply_env_overrides();
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Write `cfg` as pretty TOML, creating parent directories as needed.
pub fn save_to(cfg: &WorldModelConfig, path: &Path) -> Result<(), WorldError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| WorldError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| WorldError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| WorldError::Config(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(WorldModelConfig::default().validate().is_ok());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&config_path_in(dir.path())).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn roundtrip_through_file() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_in(&dir.path().join("nested"));

        let mut cfg = WorldModelConfig::default();
        cfg.tracker.gate_distance = 3.5;
        cfg.temporal.max_history = 80;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.tracker.gate_distance, 3.5);
        assert_eq!(loaded.temporal.max_history, 80);
        assert_eq!(loaded.sparse, SparseConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_in(dir.path());
        fs::write(&path, "[change]\nz_threshold = 4.0\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.change.z_threshold, 4.0);
        assert_eq!(loaded.change.baseline_window, ChangeConfig::default().baseline_window);
        assert_eq!(loaded.tracker, TrackerConfig::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_in(dir.path());
        fs::write(&path, "[temporal\nsmoothing_factor = ").unwrap();
        assert!(matches!(load_from(&path), Err(WorldError::Config(_))));
    }

    #[test]
    fn out_of_range_value_is_rejected_on_load() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_in(dir.path());
        fs::write(&path, "[sparse]\nmax_samples = 0\n").unwrap();
        assert!(matches!(load_from(&path), Err(WorldError::InvalidConfig { .. })));
    }

    // ── environment overrides ───────────────────────────────────────────────

    #[test]
    fn apply_env_overrides_changes_anomaly_threshold() {
        let _env = crate::env_lock();
        // SAFETY: every test in this crate that touches the environment holds
        // `env_lock`, so no other thread reads or writes it concurrently.
        unsafe { std::env::set_var("COGWORLD_ANOMALY_THRESHOLD", "4.5") };
        let mut cfg = WorldModelConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("COGWORLD_ANOMALY_THRESHOLD") };
        assert_eq!(cfg.temporal.anomaly_threshold, 4.5);
    }

    #[test]
    fn apply_env_overrides_changes_min_trust_threshold() {
        let _env = crate::env_lock();
        // SAFETY: serialized by `env_lock`.
        unsafe { std::env::set_var("COGWORLD_MIN_TRUST_THRESHOLD", " 0.45 ") };
        let mut cfg = WorldModelConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("COGWORLD_MIN_TRUST_THRESHOLD") };
        assert_eq!(cfg.reasoner.min_trust_threshold, 0.45);
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_number() {
        let _env = crate::env_lock();
        // SAFETY: serialized by `env_lock`.
        unsafe { std::env::set_var("COGWORLD_SMOOTHING_FACTOR", "fast") };
        let mut cfg = WorldModelConfig::default();
        let original = cfg.temporal.smoothing_factor;
        apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("COGWORLD_SMOOTHING_FACTOR") };
        assert_eq!(cfg.temporal.smoothing_factor, original);
    }
}
