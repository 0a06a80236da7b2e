//! In-memory table of volumes keyed by name.
//!
//! The registry itself is not synchronized; the controller keeps it behind a
//! single `RwLock` and holds that lock for the whole of every operation.

use std::collections::HashMap;

use crate::error::{Result, VolumeError};
use crate::volume::Volume;

/// Volumes keyed by unique name.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: HashMap<String, Volume>,
}

impl VolumeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            volumes: HashMap::new(),
        }
    }

    /// Add a volume. Fails if one with the same name is already registered.
    pub fn insert(&mut self, volume: Volume) -> Result<()> {
        if self.volumes.contains_key(&volume.name) {
            return Err(VolumeError::AlreadyExists { name: volume.name });
        }
        self.volumes.insert(volume.name.clone(), volume);
        Ok(())
    }

    /// Look up a volume, or [`VolumeError::NotFound`].
    pub fn get(&self, name: &str) -> Result<&Volume> {
        self.volumes.get(name).ok_or_else(|| not_found(name))
    }

    /// Mutable lookup, or [`VolumeError::NotFound`].
    pub fn get_mut(&mut self, name: &str) -> Result<&mut Volume> {
        self.volumes.get_mut(name).ok_or_else(|| not_found(name))
    }

    /// Drop a volume from the table and hand it back.
    pub fn remove(&mut self, name: &str) -> Result<Volume> {
        self.volumes.remove(name).ok_or_else(|| not_found(name))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// All volumes, ordered by name.
    pub fn list(&self) -> Vec<&Volume> {
        let mut volumes: Vec<&Volume> = self.volumes.values().collect();
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        volumes
    }

    /// Number of registered volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// True when no volumes are registered.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

fn not_found(name: &str) -> VolumeError {
    VolumeError::NotFound {
        name: name.to_string(),
    }
}
