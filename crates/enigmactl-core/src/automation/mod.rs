//! Unattended playback: message corpus, engine and status publishing.

pub mod engine;
pub mod message;
pub mod status;

pub use engine::{
    AutomationEngine, EngineError, EngineHandle, EngineSettings, PauseReason, PlaybackState,
};
pub use message::{group_text, load_corpus, CorpusError, Direction, Message, MessageRecord};
pub use status::{ErrorNotifier, PlaybackPhase, Severity, StatusPublisher, StatusSnapshot};
