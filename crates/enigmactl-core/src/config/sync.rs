//! Config synchronizer
//!
//! Pushes a configuration snapshot to the machine field by field, in a fixed
//! order, halting on the first rejection. The machine validates dependent
//! fields against each other (rotor names against the model, position count
//! against the rotor count), so the order is part of the protocol contract.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::{CommandCode, ProtocolError, Session};

use super::snapshot::{CipherSettings, ConfigSnapshot, PreserveFlags};
use super::store::{ConfigStore, StoreError};

/// A configuration field as pushed to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    /// Machine model.
    Model,
    /// Reflector and rotor selection.
    RotorSet,
    /// Ring settings.
    RingSettings,
    /// Rotor start position.
    RingPosition,
    /// Plugboard pairs.
    Plugboard,
    /// Panel lock flags.
    Locks,
    /// Display brightness.
    Brightness,
    /// Speaker volume.
    Volume,
    /// Screen saver timeout.
    ScreenSaver,
    /// Battery power-off timeout.
    TimeoutBattery,
    /// Plugged-in power-off timeout.
    TimeoutPlugged,
    /// Setup-mode power-off timeout.
    TimeoutSetup,
}

impl ConfigField {
    fn command(&self) -> CommandCode {
        match self {
            ConfigField::Model => CommandCode::Model,
            ConfigField::RotorSet => CommandCode::RotorSet,
            ConfigField::RingSettings => CommandCode::RingSettings,
            ConfigField::RingPosition => CommandCode::RingPosition,
            ConfigField::Plugboard => CommandCode::Plugboard,
            ConfigField::Locks => CommandCode::Locks,
            ConfigField::Brightness => CommandCode::Brightness,
            ConfigField::Volume => CommandCode::Volume,
            ConfigField::ScreenSaver => CommandCode::ScreenSaver,
            ConfigField::TimeoutBattery => CommandCode::TimeoutBattery,
            ConfigField::TimeoutPlugged => CommandCode::TimeoutPlugged,
            ConfigField::TimeoutSetup => CommandCode::TimeoutSetup,
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::Model => "model",
            ConfigField::RotorSet => "rotor set",
            ConfigField::RingSettings => "ring settings",
            ConfigField::RingPosition => "ring position",
            ConfigField::Plugboard => "plugboard",
            ConfigField::Locks => "locks",
            ConfigField::Brightness => "brightness",
            ConfigField::Volume => "volume",
            ConfigField::ScreenSaver => "screen saver",
            ConfigField::TimeoutBattery => "battery timeout",
            ConfigField::TimeoutPlugged => "plugged-in timeout",
            ConfigField::TimeoutSetup => "setup timeout",
        };
        f.write_str(name)
    }
}

/// A field the machine rejected, with its diagnostic verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device rejected {field}: {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: ConfigField,
    /// The device's error text, unmodified.
    pub message: String,
}

/// Errors from a configuration push.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The machine rejected a field value. Recoverable by the operator;
    /// the push stops at the offending field and is never retried blindly.
    #[error(transparent)]
    Rejected(#[from] ConfigError),

    /// Transport or session fault underneath the push.
    #[error(transparent)]
    Session(#[from] ProtocolError),

    /// Persisting after a successful push failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fields successfully applied by a push, in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedConfig {
    /// Applied fields in push order.
    pub fields: Vec<ConfigField>,
}

/// Pushes snapshots to the machine through a session.
pub struct Synchronizer<'a> {
    session: &'a mut Session,
}

impl<'a> Synchronizer<'a> {
    /// Borrow a session for pushing.
    pub fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Push the full snapshot: cipher fields first, then panel settings.
    pub fn push(&mut self, snapshot: &ConfigSnapshot) -> Result<AppliedConfig, SyncError> {
        let touch = &snapshot.touch;
        let fields: Vec<(ConfigField, String)> = cipher_fields(&snapshot.cipher)
            .into_iter()
            .chain([
                (ConfigField::Locks, touch.lock_value()),
                (ConfigField::Brightness, touch.brightness.to_string()),
                (ConfigField::Volume, touch.volume.to_string()),
                (ConfigField::ScreenSaver, touch.screen_saver.to_string()),
                (ConfigField::TimeoutBattery, touch.timeout_battery.to_string()),
                (ConfigField::TimeoutPlugged, touch.timeout_plugged.to_string()),
                (ConfigField::TimeoutSetup, touch.timeout_setup.to_string()),
            ])
            .collect();
        self.push_fields(fields)
    }

    /// Push only the cipher setup (per-message overrides during playback).
    pub fn push_cipher(&mut self, cipher: &CipherSettings) -> Result<AppliedConfig, SyncError> {
        self.push_fields(cipher_fields(cipher))
    }

    /// Push the full snapshot and persist it only if every field applied.
    pub fn push_and_persist(
        &mut self,
        snapshot: &ConfigSnapshot,
        store: &ConfigStore,
        flags: PreserveFlags,
    ) -> Result<AppliedConfig, SyncError> {
        let applied = self.push(snapshot)?;
        store.save(snapshot, flags)?;
        Ok(applied)
    }

    fn push_fields(
        &mut self,
        fields: Vec<(ConfigField, String)>,
    ) -> Result<AppliedConfig, SyncError> {
        let mut applied = AppliedConfig::default();
        for (field, value) in fields {
            debug!(%field, %value, "pushing configuration field");
            match self.session.set(field.command(), &value) {
                Ok(_) => applied.fields.push(field),
                Err(ProtocolError::DeviceError(message)) => {
                    return Err(ConfigError { field, message }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(count = applied.fields.len(), "configuration push complete");
        Ok(applied)
    }
}

/// The cipher fields in required push order. Plugboard value may be empty,
/// which sends the bare clear command.
fn cipher_fields(cipher: &CipherSettings) -> Vec<(ConfigField, String)> {
    vec![
        (ConfigField::Model, cipher.model.clone()),
        (ConfigField::RotorSet, cipher.rotor_set.clone()),
        (ConfigField::RingSettings, cipher.ring_settings.clone()),
        (ConfigField::RingPosition, cipher.ring_position.clone()),
        (ConfigField::Plugboard, cipher.plugboard.clone()),
    ]
}
