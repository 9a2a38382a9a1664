use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{ConfigField, PresenceConfig};
use crate::validate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {}", join_fields(.fields))]
    InvalidConfig { fields: Vec<ConfigField> },
    #[error("config patch must be a JSON object")]
    NotAnObject,
}

fn join_fields(fields: &[ConfigField]) -> String {
    fields
        .iter()
        .map(|f| f.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single source of truth for the monitoring configuration.
///
/// `current` only ever changes through [`ConfigStore::apply`], which either
/// commits a fully valid configuration or leaves everything as it was.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: PresenceConfig,
    last_valid: PresenceConfig,
}

impl ConfigStore {
    /// Seeds from defaults overlaid with `overrides`. The seed is accepted
    /// even when incomplete so the process can start and report not-ready.
    pub fn seeded(overrides: &Map<String, Value>) -> Self {
        let mut seed = PresenceConfig::default();
        seed.overlay(overrides);
        Self {
            current: seed.clone(),
            last_valid: seed,
        }
    }

    pub fn current(&self) -> &PresenceConfig {
        &self.current
    }

    pub fn is_valid(&self, keys: Option<&[ConfigField]>) -> bool {
        validate::validate_all(&self.current, keys)
    }

    pub fn invalid_fields(&self) -> Vec<ConfigField> {
        invalid_fields(&self.current)
    }

    /// Applies a partial update. Returns `Ok(true)` when a valid change was
    /// committed and `Ok(false)` when the patch changed nothing. Any invalid
    /// value, or a merged result that fails validation, rolls back to the
    /// last valid configuration.
    pub fn apply(&mut self, patch: &Map<String, Value>) -> Result<bool, ConfigError> {
        let mut merged = self.current.clone();
        let mut changed = false;

        for (key, value) in patch {
            if value.is_null() {
                continue;
            }
            let Some(field) = ConfigField::from_key(key) else {
                debug!(key = %key, "ignoring unknown config key");
                continue;
            };
            if !validate::validate(field, value) {
                return Err(self.reject(vec![field], patch));
            }
            changed |= merged.assign(field, value);
        }

        if !changed {
            return Ok(false);
        }

        let invalid = invalid_fields(&merged);
        if !invalid.is_empty() {
            return Err(self.reject(invalid, patch));
        }

        self.current = merged.clone();
        self.last_valid = merged;
        Ok(true)
    }

    /// Same as [`ConfigStore::apply`] for an arbitrary JSON value.
    pub fn apply_value(&mut self, patch: &Value) -> Result<bool, ConfigError> {
        match patch.as_object() {
            Some(map) => self.apply(map),
            None => Err(ConfigError::NotAnObject),
        }
    }

    fn reject(&mut self, fields: Vec<ConfigField>, patch: &Map<String, Value>) -> ConfigError {
        self.current = self.last_valid.clone();
        let err = ConfigError::InvalidConfig { fields };
        let patch = Value::Object(patch.clone());
        error!(error = %err, patch = %patch, "rejected config update");
        err
    }
}

fn invalid_fields(config: &PresenceConfig) -> Vec<ConfigField> {
    ConfigField::ALL
        .iter()
        .copied()
        .filter(|field| !validate::validate_all(config, Some(&[*field])))
        .collect()
}
