//! Named command shortcuts, persisted after every mutation.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HubError, Result};
use crate::store::{PersistenceStore, PRESETS_KEY};

/// A saved command shortcut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub command: String,
}

#[derive(Debug)]
pub struct PresetManager {
    presets: Vec<Preset>,
    store: PersistenceStore,
}

impl PresetManager {
    /// Load whatever presets the store holds.
    pub fn load(store: PersistenceStore) -> Self {
        let presets = store.load(PRESETS_KEY);
        Self { presets, store }
    }

    /// Create a preset with a fresh id. Blank name or command is rejected and
    /// leaves the collection untouched.
    pub fn add(&mut self, name: &str, command: &str) -> Result<Preset> {
        if name.trim().is_empty() || command.trim().is_empty() {
            return Err(HubError::EmptyPresetField);
        }
        let preset = Preset {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            command: command.to_string(),
        };
        self.presets.push(preset.clone());
        self.persist();
        info!(id = %preset.id, name = %preset.name, "preset saved");
        Ok(preset)
    }

    /// Remove by id. Returns the removed preset, `None` if there was none.
    pub fn remove(&mut self, id: &str) -> Option<Preset> {
        let idx = self.presets.iter().position(|p| p.id == id)?;
        let removed = self.presets.remove(idx);
        self.persist();
        info!(id, "preset removed");
        Some(removed)
    }

    pub fn list(&self) -> &[Preset] {
        &self.presets
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    fn persist(&self) {
        self.store.save(PRESETS_KEY, &self.presets);
    }
}
