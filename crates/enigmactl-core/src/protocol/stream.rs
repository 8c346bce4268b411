//! Byte channel abstraction
//!
//! The session talks to the device through a [`Channel`] rather than a
//! concrete serial port, so protocol behavior can be exercised against
//! scripted mock devices in tests.

use serialport::SerialPort;
use std::io::{Read, Write};

use super::ProtocolError;

/// A bidirectional byte channel to the device.
///
/// Reads must never block indefinitely: `read` returns whatever is currently
/// available (possibly after a short port timeout) and callers poll
/// `bytes_to_read` to decide whether to read at all.
pub trait Channel: Send {
    /// Write the whole buffer to the device.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), ProtocolError>;

    /// Read available bytes into `buf`, returning the count.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError>;

    /// Number of bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<u32, ProtocolError>;

    /// Discard anything waiting in the input buffer.
    fn clear_input(&mut self) -> Result<(), ProtocolError>;
}

/// [`Channel`] implementation over a real serial port.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already-opened and configured port.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Channel for SerialChannel {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // A port-level timeout just means "nothing yet".
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn bytes_to_read(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.port.bytes_to_read()?)
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
