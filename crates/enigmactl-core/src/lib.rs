//! # enigmactl-core
//!
//! Core library for driving Enigma Touch replica machines in unattended
//! museum installations.
//!
//! The machine is the cipher oracle: this library never simulates Enigma
//! encryption. It speaks the replica's line-oriented serial protocol,
//! synchronizes configuration, and plays pre-encoded demonstration messages
//! while watching for visitors interacting with the machine.
//!
//! ## Layout
//!
//! - [`protocol`]: framing, serial port handling, command codes and the
//!   stateful device session.
//! - [`config`]: configuration snapshots, the persistent JSON store and the
//!   ordered device synchronizer.
//! - [`automation`]: the message corpus, the playback engine and the status
//!   publisher consumed by the menu and web front ends.

#![warn(missing_docs)]

pub mod automation;
pub mod config;
pub mod protocol;

/// Library version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types.
pub mod prelude {
    pub use crate::automation::{
        AutomationEngine, Direction, EngineSettings, Message, PlaybackState, StatusPublisher,
    };
    pub use crate::config::{ConfigSnapshot, ConfigStore, PreserveFlags, Synchronizer};
    pub use crate::protocol::{ProtocolError, Session, SessionConfig};
}
