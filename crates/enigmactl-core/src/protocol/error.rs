//! Protocol error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the device protocol layer.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No reply arrived within the exchange timeout.
    #[error("Device did not reply within {0:?}")]
    DeviceTimeout(Duration),

    /// The device rejected a command. The text is exactly what followed the
    /// `*** ` marker on the wire; operators see it unmodified.
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The device stayed silent even after a resynchronization attempt.
    #[error("Device unresponsive after resynchronization")]
    DeviceUnresponsive,

    /// Firmware negotiation resolved a version below the supported minimum.
    #[error("Unsupported firmware: version {found} is older than {minimum}")]
    FirmwareUnsupported {
        /// Version the device reported.
        found: String,
        /// Oldest version this library speaks.
        minimum: String,
    },

    /// Character outside the printable ASCII range, rejected before any I/O.
    #[error("Character {0:?} cannot be sent to the device")]
    InvalidCharacter(char),

    /// Not connected to a device
    #[error("Not connected to device")]
    NotConnected,

    /// A reply arrived but did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        ProtocolError::Serial(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_text_is_verbatim() {
        let err = ProtocolError::DeviceError("Invalid rotor selection".to_string());
        assert_eq!(err.to_string(), "Device error: Invalid rotor selection");
    }

    #[test]
    fn timeout_reports_duration() {
        let err = ProtocolError::DeviceTimeout(Duration::from_secs(2));
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err: ProtocolError = io.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
