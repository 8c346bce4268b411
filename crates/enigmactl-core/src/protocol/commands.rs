//! Command codes and reply parsing
//!
//! Every configuration item on the machine is addressed by a two-letter code.
//! Prefixing the code with `?` queries the current value, `!` sets it. Reply
//! bodies have fixed shapes; the parsers here are the only place those shapes
//! are known.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use super::ProtocolError;

/// Two-letter command codes understood by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `MO` - machine model
    Model,
    /// `RO` - rotor selection
    RotorSet,
    /// `RI` - ring settings
    RingSettings,
    /// `RP` - rotor (ring) position
    RingPosition,
    /// `PB` - plugboard pairs
    Plugboard,
    /// `VE` - firmware version
    Firmware,
    /// `LK` - configuration lock flags
    Locks,
    /// `BR` - display brightness
    Brightness,
    /// `VO` - speaker volume
    Volume,
    /// `SV` - screen saver timeout
    ScreenSaver,
    /// `TB` - power-off timeout on battery
    TimeoutBattery,
    /// `TP` - power-off timeout when plugged in
    TimeoutPlugged,
    /// `TM` - power-off timeout in setup mode
    TimeoutSetup,
    /// `RS` - factory reset
    FactoryReset,
}

impl CommandCode {
    /// The two-letter wire code.
    pub fn code(&self) -> &'static str {
        match self {
            CommandCode::Model => "MO",
            CommandCode::RotorSet => "RO",
            CommandCode::RingSettings => "RI",
            CommandCode::RingPosition => "RP",
            CommandCode::Plugboard => "PB",
            CommandCode::Firmware => "VE",
            CommandCode::Locks => "LK",
            CommandCode::Brightness => "BR",
            CommandCode::Volume => "VO",
            CommandCode::ScreenSaver => "SV",
            CommandCode::TimeoutBattery => "TB",
            CommandCode::TimeoutPlugged => "TP",
            CommandCode::TimeoutSetup => "TM",
            CommandCode::FactoryReset => "RS",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Firmware version as an ordered (major, minor) pair.
///
/// Compared numerically, so 4.21 > 4.9 would hold if such versions existed;
/// the machine encodes minor as two digits, avoiding the ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    /// Major version number.
    pub major: u8,
    /// Minor version number (two digits on the wire).
    pub minor: u8,
}

impl FirmwareVersion {
    /// Oldest firmware this library speaks.
    pub const MINIMUM: FirmwareVersion = FirmwareVersion { major: 4, minor: 20 };

    /// Version assumed for devices that predate the `?VE` query.
    pub const LEGACY: FirmwareVersion = FirmwareVersion { major: 4, minor: 20 };

    /// Parse a `Firmware NNN` reply line.
    ///
    /// The payload must be exactly three digits: first digit major, last two
    /// minor (`421` is 4.21). Any other length is malformed rather than
    /// guessed at.
    pub fn parse_reply(line: &str) -> Result<Self, ProtocolError> {
        let digits = line
            .strip_prefix("Firmware")
            .map(str::trim)
            .ok_or_else(|| ProtocolError::InvalidResponse(line.to_string()))?;

        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidResponse(line.to_string()));
        }

        let major = digits[..1]
            .parse()
            .map_err(|_| ProtocolError::InvalidResponse(line.to_string()))?;
        let minor = digits[1..]
            .parse()
            .map_err(|_| ProtocolError::InvalidResponse(line.to_string()))?;
        Ok(FirmwareVersion { major, minor })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Configuration lock flags reported by `?LK` (`Locks B B B B`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    /// Model selection locked.
    pub model: bool,
    /// Rotor selection locked.
    pub rotor: bool,
    /// Ring settings locked.
    pub ring: bool,
    /// Power-off button disabled.
    pub power_off: bool,
}

impl LockState {
    /// Parse a `Locks B B B B` reply line.
    pub fn parse_reply(line: &str) -> Result<Self, ProtocolError> {
        let rest = line
            .strip_prefix("Locks")
            .ok_or_else(|| ProtocolError::InvalidResponse(line.to_string()))?;
        let flags: Vec<bool> = rest
            .split_whitespace()
            .map(|t| t != "0")
            .collect();
        if flags.len() != 4 {
            return Err(ProtocolError::InvalidResponse(line.to_string()));
        }
        Ok(LockState {
            model: flags[0],
            rotor: flags[1],
            ring: flags[2],
            power_off: flags[3],
        })
    }
}

/// Rotor positions as reported by the machine, leftmost rotor first.
/// Three values for three-rotor models, four for the M4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotorPositions(
    /// Position values, leftmost rotor first.
    pub Vec<u8>,
);

impl fmt::Display for RotorPositions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for p in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{:02}", p)?;
            first = false;
        }
        Ok(())
    }
}

/// One completed character exchange: the character the machine received, the
/// lamp it lit, and the rotor positions after stepping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterExchange {
    /// Character the machine processed (as echoed back).
    pub input: char,
    /// Resulting output character.
    pub output: char,
    /// Rotor positions after the exchange.
    pub positions: RotorPositions,
}

fn exchange_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // in SP out SP "Positions" then 3 or 4 two-digit values. The device
        // interleaves prompts and echoes, so this is a scan, not a match.
        Regex::new(r"([A-Za-z]) ([A-Za-z]) [Pp]ositions((?: \d{2}){3,4})")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Collapse raw reply bytes into a single whitespace-normalized line.
pub fn normalize_reply(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scan normalized reply text for a character-exchange report.
pub fn parse_exchange(text: &str) -> Option<CharacterExchange> {
    let caps = exchange_regex().captures(text)?;
    let input = caps.get(1)?.as_str().chars().next()?;
    let output = caps.get(2)?.as_str().chars().next()?;
    let positions: Vec<u8> = caps
        .get(3)?
        .as_str()
        .split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect();
    Some(CharacterExchange {
        input: input.to_ascii_uppercase(),
        output: output.to_ascii_uppercase(),
        positions: RotorPositions(positions),
    })
}
