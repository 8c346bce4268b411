//! Device communication protocol
//!
//! Everything needed to talk to an Enigma Touch replica over its serial
//! link: framing, port handling, command codes, reply parsing and the
//! stateful session that ties them together.

pub mod commands;
pub mod error;
pub mod frame;
pub mod serial;
pub mod session;
pub mod stream;

pub use commands::{CharacterExchange, CommandCode, FirmwareVersion, LockState, RotorPositions};
pub use error::ProtocolError;
pub use frame::{FrameBuffer, ERROR_MARKER, TERMINATOR};
pub use serial::{list_ports, PortInfo};
pub use session::{OperatingMode, Session, SessionConfig, Unsolicited};
pub use stream::{Channel, SerialChannel};

/// The machine's fixed line speed. Not configurable on the device side.
pub const BAUD_RATE: u32 = 9600;
