//! Configuration snapshot records
//!
//! The persisted configuration is three independent records: the cipher
//! setup pushed to the machine, the touch-panel settings, and presentation
//! timing used only by automation. Snapshots are plain values; the store
//! owns the file and callers pass snapshots around by value.

use serde::{Deserialize, Serialize};

/// Cipher machine setup: everything that determines the encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherSettings {
    /// Machine model, e.g. "I", "M3", "M4".
    pub model: String,
    /// Reflector and rotor selection, leftmost first, e.g. "A III IV I".
    pub rotor_set: String,
    /// Ring settings, e.g. "01 01 01".
    pub ring_settings: String,
    /// Rotor start position, e.g. "20 06 10".
    pub ring_position: String,
    /// Plugboard pairs, e.g. "VF PQ". Empty string means no plugs.
    pub plugboard: String,
}

impl Default for CipherSettings {
    fn default() -> Self {
        Self {
            model: "I".to_string(),
            rotor_set: "A III IV I".to_string(),
            ring_settings: "01 01 01".to_string(),
            ring_position: "20 06 10".to_string(),
            plugboard: "VF PQ".to_string(),
        }
    }
}

/// Touch-panel settings: lock flags and the machine's own UI knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchSettings {
    /// Lock model selection on the panel.
    pub lock_model: bool,
    /// Lock rotor selection on the panel.
    pub lock_rotor: bool,
    /// Lock ring settings on the panel.
    pub lock_ring: bool,
    /// Disable the panel's power-off button.
    pub disable_power_off: bool,
    /// Display brightness, 0-5.
    pub brightness: u8,
    /// Speaker volume, 0-5.
    pub volume: u8,
    /// Screen saver timeout in minutes, 0 disables.
    pub screen_saver: u32,
    /// Power-off timeout on battery, minutes.
    pub timeout_battery: u32,
    /// Power-off timeout when plugged in, minutes, 0 disables.
    pub timeout_plugged: u32,
    /// Power-off timeout in setup mode, minutes, 0 disables.
    pub timeout_setup: u32,
}

impl Default for TouchSettings {
    fn default() -> Self {
        Self {
            lock_model: true,
            lock_rotor: true,
            lock_ring: true,
            disable_power_off: true,
            brightness: 3,
            volume: 0,
            screen_saver: 0,
            timeout_battery: 15,
            timeout_plugged: 0,
            timeout_setup: 0,
        }
    }
}

impl TouchSettings {
    /// Lock flags in `!LK` wire order: model, rotor, ring, power-off.
    pub fn lock_value(&self) -> String {
        format!(
            "{} {} {} {}",
            self.lock_model as u8,
            self.lock_rotor as u8,
            self.lock_ring as u8,
            self.disable_power_off as u8
        )
    }
}

/// Automation presentation timing. Never sent to the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationSettings {
    /// Pause between messages, and the resume window after an interruption,
    /// in seconds.
    pub message_delay_secs: u64,
    /// Extra delay between character exchanges, in milliseconds.
    pub character_delay_ms: u64,
    /// Letters per display group, e.g. 5 for "ABCDE FGHIJ".
    pub word_group_size: usize,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            message_delay_secs: 60,
            character_delay_ms: 0,
            word_group_size: 5,
        }
    }
}

/// The full persisted configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// Cipher machine setup.
    pub cipher: CipherSettings,
    /// Touch-panel settings.
    pub touch: TouchSettings,
    /// Presentation timing.
    pub presentation: PresentationSettings,
}

/// What to keep from the stored file when saving.
///
/// The flags are orthogonal: preserving the whole cipher configuration
/// implies the ring position stays too, but the position can also be
/// preserved on its own (an encode run moves the rotors without the stored
/// start position changing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreserveFlags {
    /// Keep the stored cipher configuration entirely.
    pub cipher_config: bool,
    /// Keep only the stored ring position.
    pub ring_position: bool,
}
