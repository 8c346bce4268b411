//! Protocol session
//!
//! Owns a [`Channel`] and holds all per-connection state: negotiated firmware
//! version, operating mode and lock flags. All command traffic goes through
//! this type; nothing else writes to the wire.
//!
//! Replies are collected with a polling read loop: keep draining
//! `bytes_to_read` until at least one line has arrived and the line has been
//! quiet for a short window, or the exchange timeout expires. The machine has
//! no flow control, so blocking reads mid-reply would lose bytes.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::commands::{
    normalize_reply, parse_exchange, CharacterExchange, CommandCode, FirmwareVersion, LockState,
};
use super::frame::{encode_command, error_text, FrameBuffer};
use super::serial::open_port;
use super::stream::{Channel, SerialChannel};
use super::ProtocolError;

/// Recovery sequence for a stalled exchange: a bare carriage return to flush
/// whatever half-frame the machine is sitting on, then a model query it can
/// answer from any state. Deliberately not a full `\r\n` leading terminator.
const RESYNC_SEQUENCE: &[u8] = b"\r?MO\r\n";

/// What the session believes the machine is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// No traffic yet.
    #[default]
    Idle,
    /// Last exchange was a configuration query or set.
    Config,
    /// Streaming plaintext characters for encoding.
    Encode,
    /// Streaming ciphertext characters for decoding.
    Decode,
}

/// Device-initiated traffic drained by [`Session::poll_unsolicited`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsolicited {
    /// A bystander pressed a key on the machine.
    KeyPress(CharacterExchange),
    /// Bytes that did not parse as a key press.
    Noise(String),
}

/// Tunable timing for a session. Defaults match the machine's observed
/// behavior; tests shrink them for speed.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for a query/set reply.
    pub query_timeout: Duration,
    /// How long to wait for a character-exchange reply.
    pub char_timeout: Duration,
    /// Inter-character quiet window that ends a reply.
    pub quiet_window: Duration,
    /// Sleep between `bytes_to_read` polls.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(2),
            char_timeout: Duration::from_secs(2),
            quiet_window: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// A live protocol session with the machine.
pub struct Session {
    channel: Box<dyn Channel>,
    config: SessionConfig,
    firmware: Option<FirmwareVersion>,
    downgraded: bool,
    mode: OperatingMode,
    locks: LockState,
}

impl Session {
    /// Open the named serial port and wrap it in a session. Firmware
    /// negotiation is a separate step; see [`Session::negotiate_firmware`].
    pub fn open(port_name: &str) -> Result<Self, ProtocolError> {
        info!(port = port_name, "opening device port");
        let port = open_port(port_name)?;
        Ok(Self::with_channel(
            Box::new(SerialChannel::new(port)),
            SessionConfig::default(),
        ))
    }

    /// Build a session over an arbitrary channel (mock devices in tests).
    pub fn with_channel(channel: Box<dyn Channel>, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            firmware: None,
            downgraded: false,
            mode: OperatingMode::Idle,
            locks: LockState::default(),
        }
    }

    /// Negotiated firmware version, if negotiation has run.
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    /// True when the version was assumed via the legacy probe rather than
    /// reported by the device.
    pub fn firmware_downgraded(&self) -> bool {
        self.downgraded
    }

    /// Current operating mode.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Lock flags captured during negotiation or the last `?LK` query.
    pub fn locks(&self) -> LockState {
        self.locks
    }

    /// Record the streaming direction before sending characters.
    pub fn set_streaming_mode(&mut self, mode: OperatingMode) {
        self.mode = mode;
    }

    /// Resolve the firmware version.
    ///
    /// Probes `?VE` first; a structured reply resolves directly. If the
    /// device does not understand the command, probes the older `?LK`
    /// query; a lock reply resolves to the assumed legacy version with a
    /// recorded downgrade. If neither probe is understood the device is
    /// unsupported and no further commands may be sent. A rejection for any
    /// other reason (locked configuration, mid-setup state) is surfaced
    /// as-is rather than misread as old firmware.
    pub fn negotiate_firmware(&mut self) -> Result<FirmwareVersion, ProtocolError> {
        match self.query(CommandCode::Firmware) {
            Ok(lines) => {
                let line = lines
                    .iter()
                    .find(|l| l.starts_with("Firmware"))
                    .ok_or_else(|| ProtocolError::InvalidResponse(lines.join(" / ")))?;
                let version = FirmwareVersion::parse_reply(line)?;
                if version < FirmwareVersion::MINIMUM {
                    return Err(ProtocolError::FirmwareUnsupported {
                        found: version.to_string(),
                        minimum: FirmwareVersion::MINIMUM.to_string(),
                    });
                }
                info!(%version, "firmware version resolved");
                self.firmware = Some(version);
                self.downgraded = false;
                Ok(version)
            }
            Err(ProtocolError::DeviceError(msg)) if is_unknown_command(&msg) => {
                debug!(%msg, "version query not understood, probing legacy lock query");
                match self.query(CommandCode::Locks) {
                    Ok(lines) => {
                        let line = lines
                            .iter()
                            .find(|l| l.starts_with("Locks"))
                            .ok_or_else(|| ProtocolError::InvalidResponse(lines.join(" / ")))?;
                        self.locks = LockState::parse_reply(line)?;
                        let version = FirmwareVersion::LEGACY;
                        warn!(
                            assumed = %version,
                            "device predates the version query, downgrading to legacy firmware"
                        );
                        self.firmware = Some(version);
                        self.downgraded = true;
                        Ok(version)
                    }
                    Err(ProtocolError::DeviceError(msg)) if is_unknown_command(&msg) => {
                        Err(ProtocolError::FirmwareUnsupported {
                            found: "unknown".to_string(),
                            minimum: FirmwareVersion::MINIMUM.to_string(),
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Query the current value of a configuration item.
    ///
    /// Returns every non-blank reply line (the machine echoes the command
    /// before answering). A line carrying the error marker aborts the whole
    /// exchange with the device's text verbatim.
    pub fn query(&mut self, code: CommandCode) -> Result<Vec<String>, ProtocolError> {
        let lines = self.command_round_trip(&format!("?{}", code.code()))?;
        self.mode = OperatingMode::Config;
        Ok(lines)
    }

    /// Set a configuration item. An empty `value` sends the bare command,
    /// which for the plugboard means "remove all plugs".
    pub fn set(&mut self, code: CommandCode, value: &str) -> Result<Vec<String>, ProtocolError> {
        let body = if value.is_empty() {
            format!("!{}", code.code())
        } else {
            format!("!{} {}", code.code(), value)
        };
        let lines = self.command_round_trip(&body)?;
        self.mode = OperatingMode::Config;
        Ok(lines)
    }

    /// Restore the machine to factory defaults.
    pub fn factory_reset(&mut self) -> Result<Vec<String>, ProtocolError> {
        warn!("sending factory reset");
        self.set(CommandCode::FactoryReset, "")
    }

    /// Send one character and wait for the exchange report.
    ///
    /// The character must be printable ASCII; anything else is rejected
    /// before touching the wire. On a stalled exchange the resynchronization
    /// sequence is sent once and the character retried once; a second stall
    /// is [`ProtocolError::DeviceUnresponsive`].
    pub fn encode_character(&mut self, ch: char) -> Result<CharacterExchange, ProtocolError> {
        if !(' '..='~').contains(&ch) {
            return Err(ProtocolError::InvalidCharacter(ch));
        }
        let byte = ch as u8;

        match self.exchange_attempt(byte) {
            Ok(ex) => Ok(ex),
            Err(ProtocolError::DeviceTimeout(_)) | Err(ProtocolError::InvalidResponse(_)) => {
                warn!(character = %ch, "exchange stalled, resynchronizing");
                self.resync()?;
                match self.exchange_attempt(byte) {
                    Ok(ex) => Ok(ex),
                    Err(ProtocolError::DeviceTimeout(_))
                    | Err(ProtocolError::InvalidResponse(_)) => {
                        Err(ProtocolError::DeviceUnresponsive)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Drain any device-initiated traffic without blocking.
    ///
    /// Returns `Ok(None)` when the machine is silent. Used by automation
    /// while paused and between messages to detect bystander keypresses.
    pub fn poll_unsolicited(&mut self) -> Result<Option<Unsolicited>, ProtocolError> {
        if self.channel.bytes_to_read()? == 0 {
            return Ok(None);
        }
        let mut data = Vec::new();
        loop {
            let avail = self.channel.bytes_to_read()?;
            if avail == 0 {
                break;
            }
            let mut buf = vec![0u8; avail as usize];
            let n = self.channel.read(&mut buf)?;
            data.extend_from_slice(&buf[..n]);
            // Give a mid-report keypress time to finish arriving.
            thread::sleep(self.config.quiet_window);
        }
        check_error_lines(&data)?;
        let text = normalize_reply(&data);
        debug!(%text, "unsolicited device traffic");
        match parse_exchange(&text) {
            Some(ex) => Ok(Some(Unsolicited::KeyPress(ex))),
            None => Ok(Some(Unsolicited::Noise(text))),
        }
    }

    /// One framed command round trip: clear input, send, collect reply lines.
    fn command_round_trip(&mut self, body: &str) -> Result<Vec<String>, ProtocolError> {
        self.channel.clear_input()?;
        debug!(command = body, "sending command");
        self.channel.write_all(&encode_command(body))?;
        let data = self.read_until_quiet(self.config.query_timeout)?;
        check_error_lines(&data)?;
        Ok(split_lines(&data))
    }

    /// One character exchange attempt: raw byte out, scan the reply stream
    /// for the exchange report.
    fn exchange_attempt(&mut self, byte: u8) -> Result<CharacterExchange, ProtocolError> {
        self.channel.clear_input()?;
        self.channel.write_all(&[byte])?;

        let start = Instant::now();
        let mut data: Vec<u8> = Vec::new();
        let mut last_data = Instant::now();
        loop {
            let avail = self.channel.bytes_to_read()?;
            if avail > 0 {
                let mut buf = vec![0u8; avail as usize];
                let n = self.channel.read(&mut buf)?;
                data.extend_from_slice(&buf[..n]);
                last_data = Instant::now();
            }

            check_error_lines(&data)?;

            if avail == 0 && last_data.elapsed() >= self.config.quiet_window {
                if let Some(ex) = parse_exchange(&normalize_reply(&data)) {
                    return Ok(ex);
                }
            }

            if start.elapsed() >= self.config.char_timeout {
                return Err(if data.is_empty() {
                    ProtocolError::DeviceTimeout(self.config.char_timeout)
                } else {
                    ProtocolError::InvalidResponse(normalize_reply(&data))
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Send the recovery sequence and wait for the machine to answer the
    /// embedded model query. Silence here means the device is gone.
    fn resync(&mut self) -> Result<(), ProtocolError> {
        self.channel.clear_input()?;
        self.channel.write_all(RESYNC_SEQUENCE)?;
        match self.read_until_quiet(self.config.query_timeout) {
            Ok(_) => Ok(()),
            Err(ProtocolError::DeviceTimeout(_)) => Err(ProtocolError::DeviceUnresponsive),
            Err(e) => Err(e),
        }
    }

    /// Poll until at least one byte has arrived and the line has gone quiet,
    /// or the timeout expires with nothing.
    fn read_until_quiet(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let start = Instant::now();
        let mut data: Vec<u8> = Vec::new();
        let mut last_data = Instant::now();
        loop {
            let avail = self.channel.bytes_to_read()?;
            if avail > 0 {
                let mut buf = vec![0u8; avail as usize];
                let n = self.channel.read(&mut buf)?;
                data.extend_from_slice(&buf[..n]);
                last_data = Instant::now();
            } else if !data.is_empty() && last_data.elapsed() >= self.config.quiet_window {
                return Ok(data);
            }

            if start.elapsed() >= timeout {
                if data.is_empty() {
                    return Err(ProtocolError::DeviceTimeout(timeout));
                }
                return Ok(data);
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

/// Apply the error-marker rule to every terminator-complete line.
///
/// Partial data is never classified: an error reply arriving across several
/// reads would otherwise surface a truncated message, and the device's exact
/// text is the only diagnostic the operator gets.
fn check_error_lines(data: &[u8]) -> Result<(), ProtocolError> {
    let mut frames = FrameBuffer::new();
    frames.extend(data);
    while let Some(line) = frames.next_line() {
        if let Some(text) = error_text(&line) {
            return Err(ProtocolError::DeviceError(text.to_string()));
        }
    }
    Ok(())
}

/// Replies meaning the firmware predates the command, as opposed to a
/// rejection for another reason (locked configuration, mid-setup state).
fn is_unknown_command(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("unknown command") || m.contains("invalid command")
}

/// Split raw bytes into non-blank lines, including an unterminated tail.
fn split_lines(data: &[u8]) -> Vec<String> {
    let mut frames = FrameBuffer::new();
    frames.extend(data);
    let mut lines = Vec::new();
    while let Some(line) = frames.next_line() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    let tail = String::from_utf8_lossy(frames.pending());
    let tail = tail.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    lines
}
