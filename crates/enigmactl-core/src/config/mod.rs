//! Configuration: snapshots, the persistent store, and device synchronization.

pub mod snapshot;
pub mod store;
pub mod sync;

pub use snapshot::{
    CipherSettings, ConfigSnapshot, PresentationSettings, PreserveFlags, TouchSettings,
};
pub use store::{ConfigStore, StoreError};
pub use sync::{AppliedConfig, ConfigError, ConfigField, SyncError, Synchronizer};
