//! Status publisher
//!
//! The engine runs on its own thread; the menu and web collaborators read
//! progress through a mutex-guarded snapshot that is copied out whole. No
//! reader ever holds the lock across I/O.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Coarse playback phase, mirroring the engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackPhase {
    /// No run in progress.
    Idle,
    /// Pushing a per-message configuration.
    AwaitingConfigAck,
    /// Sending characters.
    Streaming,
    /// Paused on mismatch, interference or a configuration error.
    Paused,
    /// A session-fatal fault ended the run.
    Error,
    /// The run finished or was stopped.
    Stopped,
}

/// How bad a reported condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Progress notice.
    Info,
    /// Recoverable condition, run continues or waits for the operator.
    Warning,
    /// The run is over.
    Fatal,
}

/// Callback invoked for every device error or session fault. Device text is
/// passed verbatim.
pub type ErrorNotifier = Arc<dyn Fn(Severity, &str) + Send + Sync>;

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Identifies this run across snapshots.
    pub run_id: Uuid,
    /// Current phase.
    pub phase: PlaybackPhase,
    /// Index of the message being played.
    pub message_index: usize,
    /// Index of the next character within the message.
    pub character_index: usize,
    /// Messages in the corpus.
    pub message_count: usize,
    /// Last character sent to the machine.
    pub last_sent: Option<char>,
    /// Last character the machine produced.
    pub last_received: Option<char>,
    /// Rotor positions after the last exchange, display form.
    pub rotor_positions: Option<String>,
    /// Why the run is paused, when it is.
    pub pause_reason: Option<String>,
    /// Detail of the fault that ended the run, when one did.
    pub error: Option<String>,
    /// When this snapshot was last written.
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: PlaybackPhase::Idle,
            message_index: 0,
            character_index: 0,
            message_count: 0,
            last_sent: None,
            last_received: None,
            rotor_positions: None,
            pause_reason: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Shared handle to the latest snapshot. Cloning is cheap and all clones
/// observe the same run.
#[derive(Clone)]
pub struct StatusPublisher {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    /// Create a publisher starting at [`PlaybackPhase::Idle`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot::new())),
        }
    }

    /// Copy out the current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply a mutation under the lock and stamp the update time.
    pub fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
        guard.updated_at = Utc::now();
    }

    /// Start a fresh run identity and reset progress fields.
    pub fn begin_run(&self, message_count: usize) {
        self.update(|s| {
            *s = StatusSnapshot::new();
            s.message_count = message_count;
        });
    }
}
