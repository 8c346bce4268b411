//! Persistent configuration store
//!
//! Single owner of the JSON configuration file. Loads fall back to defaults
//! when the file is missing or unreadable; saves apply the preservation
//! rules against what is currently on disk, so a run that moved the rotors
//! or applied per-message overrides does not clobber the stored setup.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::snapshot::{ConfigSnapshot, PreserveFlags};

/// Errors from the configuration store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error
    #[error("Configuration file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Configuration serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Owns the configuration file at a fixed path.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store for the given file path. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored configuration, falling back to defaults when the file
    /// is missing or corrupted. A corrupted file is logged, not fatal; the
    /// next save rewrites it.
    pub fn load(&self) -> ConfigSnapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(path = %self.path.display(), "no stored configuration, using defaults");
                ConfigSnapshot::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable configuration, using defaults");
                ConfigSnapshot::default()
            }
        }
    }

    /// Save a snapshot, honoring the preservation flags against the stored
    /// file: with `cipher_config` set the stored cipher record wins wholesale;
    /// with only `ring_position` set the stored rotor position wins.
    pub fn save(&self, snapshot: &ConfigSnapshot, flags: PreserveFlags) -> Result<(), StoreError> {
        let mut to_save = snapshot.clone();

        if flags.cipher_config || flags.ring_position {
            if let Ok(Some(stored)) = self.try_load() {
                if flags.cipher_config {
                    to_save.cipher = stored.cipher;
                } else if flags.ring_position {
                    to_save.cipher.ring_position = stored.cipher.ring_position;
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&to_save)?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    fn try_load(&self) -> Result<Option<ConfigSnapshot>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}
