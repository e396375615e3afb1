//! Installs the console subscriber once for this test binary and drives a
//! world model through it.
//!
//! `init_tracing` sets the global default subscriber, which can happen only
//! once per process, so this file holds a single test.

use cogworld_runtime::{CognitiveWorldModel, TelemetryConfig, WorldModelConfig, init_tracing};
use cogworld_types::{Observation, SensorSource, StateVector, Timestamp};

#[test]
fn console_subscriber_installs_and_carries_model_events() {
    let config = TelemetryConfig {
        log_filter: "debug".to_string(),
        ..TelemetryConfig::default()
    };
    let guard = init_tracing(&config);
    assert!(!guard.is_exporting(), "no endpoint means no exporter");
    assert!(tracing::dispatcher::has_been_set());

    let mut model = CognitiveWorldModel::new("rover-1", &WorldModelConfig::default()).unwrap();
    model.start(Timestamp(0));
    let obs = Observation::new(
        "wall-1",
        StateVector::from([("x", 1.0)]),
        SensorSource::Manual,
        Timestamp(0),
    );
    model.process_observation(&obs).unwrap();
    model.tick(Timestamp(10_000));
    tracing::info!(device = "rover-1", "telemetry smoke test finished");

    drop(guard);
}
