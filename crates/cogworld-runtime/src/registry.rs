//! [`WorldModelRegistry`] – one [`CognitiveWorldModel`] per device.
//!
//! The registry is an ordinary value owned by the host, so two hosts (or two
//! tests) never share state.  Devices are fully independent; a host that
//! drives devices in parallel hands each model to exactly one worker.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use cogworld_types::WorldError;
use tracing::info;

use crate::config::WorldModelConfig;
use crate::world_model::CognitiveWorldModel;

pub struct WorldModelRegistry {
    config: WorldModelConfig,
    models: BTreeMap<String, CognitiveWorldModel>,
}

impl Default for WorldModelRegistry {
    fn default() -> Self {
        Self {
            config: WorldModelConfig::default(),
            models: BTreeMap::new(),
        }
    }
}

impl WorldModelRegistry {
    /// Registry whose models are all built from `config`.
    pub fn new(config: WorldModelConfig) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            config,
            models: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &WorldModelConfig {
        &self.config
    }

    /// The model for `device_id`, created (stopped) on first use.
    pub fn get_or_create(&mut self, device_id: &str) -> Result<&mut CognitiveWorldModel, WorldError> {
        match self.models.entry(device_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let model = CognitiveWorldModel::new(device_id, &self.config)?;
                info!(device = device_id, "world model created");
                Ok(entry.insert(model))
            }
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&CognitiveWorldModel> {
        self.models.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut CognitiveWorldModel> {
        self.models.get_mut(device_id)
    }

    /// Detach a device's model, stopping it first.
    pub fn remove(&mut self, device_id: &str) -> Option<CognitiveWorldModel> {
        let mut model = self.models.remove(device_id)?;
        model.stop();
        info!(device = device_id, "world model removed");
        Some(model)
    }

    /// Registered device ids, sorted.
    pub fn device_ids(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Stop every running model.  Returns how many were running.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for model in self.models.values_mut().filter(|m| m.is_running()) {
            model.stop();
            stopped += 1;
        }
        stopped
    }
}
