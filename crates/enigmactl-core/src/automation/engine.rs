//! Automation engine
//!
//! Plays a message corpus against the machine: push the per-message cipher
//! setup, stream the characters, compare every reply against the expected
//! output. The engine runs on the caller's thread; an [`EngineHandle`] lets
//! another thread request a stop or acknowledge a configuration error. The
//! stop signal is honored at character boundaries and pause ticks, never
//! mid-exchange.
//!
//! Any bystander keypress or output mismatch pauses playback. The pause
//! deadline slides: further input while paused restarts the wait, so the
//! run only resumes once the machine has been left alone for the whole
//! window. A mismatch resumes at the unmatched character, not after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{CipherSettings, ConfigError, PresentationSettings, SyncError, Synchronizer};
use crate::protocol::{OperatingMode, ProtocolError, Session};

use super::message::{Direction, Message};
use super::status::{ErrorNotifier, PlaybackPhase, Severity, StatusPublisher};

/// Why playback is paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
    /// The machine's output differed from the expected character.
    Mismatch {
        /// Character the corpus expected.
        expected: char,
        /// Character the machine produced.
        actual: char,
    },
    /// The machine rejected a configuration field; waiting for the operator.
    ConfigError(ConfigError),
    /// Device-initiated traffic while waiting (someone is at the machine).
    Interference,
}

impl PauseReason {
    fn describe(&self) -> String {
        match self {
            PauseReason::Mismatch { expected, actual } => {
                format!("output mismatch: expected {expected}, got {actual}")
            }
            PauseReason::ConfigError(e) => e.to_string(),
            PauseReason::Interference => "device input detected".to_string(),
        }
    }
}

/// The engine's state machine. Every transition is published to the
/// status snapshot as it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// Ready to start a run.
    Idle,
    /// Pushing a message's cipher setup.
    AwaitingConfigAck {
        /// Message whose setup is being pushed.
        message: usize,
    },
    /// Sending characters.
    Streaming {
        /// Current message index.
        message: usize,
        /// Next character index within the message.
        character: usize,
    },
    /// Playback is held; see the reason.
    Paused {
        /// Why the run is paused.
        reason: PauseReason,
        /// Message index at the pause.
        message: usize,
        /// Character index playback will resume at.
        character: usize,
        /// When the run resumes if the machine stays quiet. `None` for a
        /// configuration error, which only an acknowledgement clears.
        resume_at: Option<Instant>,
    },
    /// A session-fatal fault ended the run.
    Error {
        /// Human-readable fault description.
        detail: String,
    },
    /// The run finished or was stopped. Inert until [`AutomationEngine::reset`].
    Stopped,
}

/// Errors ending a run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `run` was called while a previous run's state was still in place.
    #[error("Engine is not idle")]
    NotIdle,

    /// Session-fatal protocol fault.
    #[error(transparent)]
    Session(#[from] ProtocolError),

    /// Configuration push fault other than a device rejection.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Timing knobs for a run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Wait between messages; also the resume window after a pause.
    pub message_delay: Duration,
    /// Extra delay between character exchanges.
    pub character_delay: Duration,
    /// Sleep between stop/interference checks while waiting.
    pub pause_poll: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            message_delay: Duration::from_secs(60),
            character_delay: Duration::ZERO,
            pause_poll: Duration::from_millis(200),
        }
    }
}

impl EngineSettings {
    /// Derive timing from persisted presentation settings.
    pub fn from_presentation(presentation: &PresentationSettings) -> Self {
        Self {
            message_delay: Duration::from_secs(presentation.message_delay_secs),
            character_delay: Duration::from_millis(presentation.character_delay_ms),
            ..Self::default()
        }
    }
}

/// Cross-thread control surface for a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    ack: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Request a stop. Honored at the next character boundary or pause tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Acknowledge a configuration error so the engine retries the push.
    pub fn acknowledge_config_error(&self) {
        self.ack.store(true, Ordering::SeqCst);
    }
}

/// Internal flow control for the wait loops.
enum Flow {
    Continue,
    Stop,
}

/// Drives a session through a message corpus.
pub struct AutomationEngine {
    session: Session,
    messages: Vec<Message>,
    settings: EngineSettings,
    status: StatusPublisher,
    notifier: Option<ErrorNotifier>,
    state: PlaybackState,
    stop: Arc<AtomicBool>,
    ack: Arc<AtomicBool>,
}

impl AutomationEngine {
    /// Build an engine over a negotiated session and a validated corpus.
    pub fn new(session: Session, messages: Vec<Message>, settings: EngineSettings) -> Self {
        Self {
            session,
            messages,
            settings,
            status: StatusPublisher::new(),
            notifier: None,
            state: PlaybackState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            ack: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install a notifier for device errors and session faults.
    pub fn with_notifier(mut self, notifier: ErrorNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Shared status view for readers on other threads.
    pub fn status(&self) -> StatusPublisher {
        self.status.clone()
    }

    /// Control handle usable from other threads.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            stop: self.stop.clone(),
            ack: self.ack.clone(),
        }
    }

    /// Current state.
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Give the session back once the engine is done with it.
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Return a finished engine to [`PlaybackState::Idle`] for another run.
    pub fn reset(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        self.ack.store(false, Ordering::SeqCst);
        self.set_state(PlaybackState::Idle);
    }

    /// Play the whole corpus in order. Returns when the corpus completes,
    /// a stop is honored, or a session-fatal fault occurs.
    pub fn run(&mut self) -> Result<(), EngineError> {
        if self.state != PlaybackState::Idle {
            return Err(EngineError::NotIdle);
        }
        self.status.begin_run(self.messages.len());
        info!(messages = self.messages.len(), "automation run starting");

        match self.run_inner() {
            Ok(()) => Ok(()),
            Err(e) => {
                let detail = e.to_string();
                self.notify(Severity::Fatal, &detail);
                self.status.update(|s| s.error = Some(detail.clone()));
                self.set_state(PlaybackState::Error { detail });
                Err(e)
            }
        }
    }

    fn run_inner(&mut self) -> Result<(), EngineError> {
        for index in 0..self.messages.len() {
            if self.stop_requested() {
                return self.finish_stopped();
            }
            let message = self.messages[index].clone();
            self.status.update(|s| {
                s.message_index = index;
                s.character_index = 0;
            });

            if let Some(cipher) = message.cipher_override.clone() {
                if let Flow::Stop = self.apply_config(index, &cipher)? {
                    return self.finish_stopped();
                }
            }

            self.session.set_streaming_mode(match message.direction {
                Direction::Encode => OperatingMode::Encode,
                Direction::Decode => OperatingMode::Decode,
            });

            if let Flow::Stop = self.stream_message(index, &message)? {
                return self.finish_stopped();
            }
            info!(message = index, "message complete");

            if index + 1 < self.messages.len() {
                if let Flow::Stop = self.wait_between_messages(index)? {
                    return self.finish_stopped();
                }
            }
        }
        self.finish_stopped()
    }

    /// Push a message's cipher setup, pausing on rejection until the
    /// operator acknowledges or stops.
    fn apply_config(&mut self, index: usize, cipher: &CipherSettings) -> Result<Flow, EngineError> {
        loop {
            self.set_state(PlaybackState::AwaitingConfigAck { message: index });
            match Synchronizer::new(&mut self.session).push_cipher(cipher) {
                Ok(_) => return Ok(Flow::Continue),
                Err(SyncError::Rejected(config_error)) => {
                    warn!(message = index, error = %config_error, "configuration rejected");
                    self.notify(Severity::Warning, &config_error.to_string());
                    self.set_state(PlaybackState::Paused {
                        reason: PauseReason::ConfigError(config_error),
                        message: index,
                        character: 0,
                        resume_at: None,
                    });
                    loop {
                        if self.stop_requested() {
                            return Ok(Flow::Stop);
                        }
                        if self.ack.swap(false, Ordering::SeqCst) {
                            debug!(message = index, "configuration error acknowledged, retrying");
                            break;
                        }
                        thread::sleep(self.settings.pause_poll);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stream one message, character by character, pausing on mismatch.
    fn stream_message(&mut self, index: usize, message: &Message) -> Result<Flow, EngineError> {
        let mut character = 0usize;
        while character < message.input.len() {
            if self.stop_requested() {
                return Ok(Flow::Stop);
            }
            self.set_state(PlaybackState::Streaming { message: index, character });

            let ch = message.input[character];
            let exchange = self.session.encode_character(ch)?;
            let expected = message.expected[character];
            self.status.update(|s| {
                s.character_index = character;
                s.last_sent = Some(ch);
                s.last_received = Some(exchange.output);
                s.rotor_positions = Some(exchange.positions.to_string());
            });

            if exchange.output != expected {
                let reason = PauseReason::Mismatch { expected, actual: exchange.output };
                self.notify(
                    Severity::Warning,
                    &format!(
                        "message {index} character {character}: expected {expected}, got {}",
                        exchange.output
                    ),
                );
                if let Flow::Stop = self.pause(reason, index, character)? {
                    return Ok(Flow::Stop);
                }
                // Retry the same character; never advance past a mismatch.
                continue;
            }

            character += 1;
            self.status.update(|s| s.character_index = character);
            if !self.settings.character_delay.is_zero() {
                thread::sleep(self.settings.character_delay);
            }
        }
        Ok(Flow::Continue)
    }

    /// Hold playback until the machine has been quiet for the whole resume
    /// window. Any input while paused restarts the window.
    fn pause(
        &mut self,
        reason: PauseReason,
        index: usize,
        character: usize,
    ) -> Result<Flow, EngineError> {
        info!(message = index, character, reason = %reason.describe(), "playback paused");
        self.status.update(|s| s.pause_reason = Some(reason.describe()));
        let mut deadline = Instant::now() + self.settings.message_delay;
        self.set_state(PlaybackState::Paused {
            reason: reason.clone(),
            message: index,
            character,
            resume_at: Some(deadline),
        });

        loop {
            if self.stop_requested() {
                return Ok(Flow::Stop);
            }
            if Instant::now() >= deadline {
                break;
            }
            let restart = match self.session.poll_unsolicited() {
                Ok(Some(traffic)) => {
                    debug!(?traffic, "input while paused, restarting resume window");
                    true
                }
                Ok(None) => {
                    thread::sleep(self.settings.pause_poll);
                    false
                }
                Err(ProtocolError::DeviceError(msg)) => {
                    self.notify(Severity::Warning, &msg);
                    true
                }
                Err(e) => return Err(e.into()),
            };
            if restart {
                deadline = Instant::now() + self.settings.message_delay;
                self.set_state(PlaybackState::Paused {
                    reason: reason.clone(),
                    message: index,
                    character,
                    resume_at: Some(deadline),
                });
            }
        }

        info!(message = index, character, "resuming playback");
        self.status.update(|s| s.pause_reason = None);
        Ok(Flow::Continue)
    }

    /// Idle wait between messages, watching for bystander input.
    fn wait_between_messages(&mut self, index: usize) -> Result<Flow, EngineError> {
        let deadline = Instant::now() + self.settings.message_delay;
        loop {
            if self.stop_requested() {
                return Ok(Flow::Stop);
            }
            if Instant::now() >= deadline {
                return Ok(Flow::Continue);
            }
            match self.session.poll_unsolicited() {
                // Someone is at the machine; switch to a sliding pause so
                // the next message only starts once they walk away.
                Ok(Some(_)) => return self.pause(PauseReason::Interference, index + 1, 0),
                Ok(None) => thread::sleep(self.settings.pause_poll),
                Err(ProtocolError::DeviceError(msg)) => {
                    self.notify(Severity::Warning, &msg);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn finish_stopped(&mut self) -> Result<(), EngineError> {
        info!("automation run finished");
        self.set_state(PlaybackState::Stopped);
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn set_state(&mut self, state: PlaybackState) {
        let phase = match &state {
            PlaybackState::Idle => PlaybackPhase::Idle,
            PlaybackState::AwaitingConfigAck { .. } => PlaybackPhase::AwaitingConfigAck,
            PlaybackState::Streaming { .. } => PlaybackPhase::Streaming,
            PlaybackState::Paused { .. } => PlaybackPhase::Paused,
            PlaybackState::Error { .. } => PlaybackPhase::Error,
            PlaybackState::Stopped => PlaybackPhase::Stopped,
        };
        self.status.update(|s| s.phase = phase);
        self.state = state;
    }

    fn notify(&self, severity: Severity, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier(severity, message);
        }
    }
}
