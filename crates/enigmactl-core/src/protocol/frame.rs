//! Frame codec
//!
//! The Enigma Touch wire protocol is line oriented: every command is wrapped
//! between a two-byte `\r\n` terminator pair, and every reply is split on the
//! same terminator before the body is inspected. The leading terminator of an
//! outbound command is itself a meaningful frame: a blank line tells the
//! device to enter its configuration context.

/// The two-byte line terminator used on both directions of the wire.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Prefix identifying a device-rejected command. The text after the marker is
/// the only diagnostic the device provides and must be surfaced verbatim.
pub const ERROR_MARKER: &str = "*** ";

/// Wrap a command body in the terminator pair.
///
/// The leading terminator doubles as the blank "enter configuration context"
/// frame, so `!`/`?` commands do not need to send it separately.
pub fn encode_command(body: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(body.len() + TERMINATOR.len() * 2);
    bytes.extend_from_slice(TERMINATOR);
    bytes.extend_from_slice(body.as_bytes());
    bytes.extend_from_slice(TERMINATOR);
    bytes
}

/// If `line` is a device error report, return the trailing text verbatim.
///
/// This single rule is applied to every inbound line; there is deliberately
/// no whitelist of known error strings since newer firmware may add more.
pub fn error_text(line: &str) -> Option<&str> {
    line.strip_prefix(ERROR_MARKER).map(str::trim_end)
}

/// Accumulates raw serial bytes and yields complete terminator-delimited
/// lines, keeping any incomplete tail buffered for the next read.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete line, or `None` when no terminator has been
    /// buffered yet (the caller must keep reading).
    ///
    /// A line containing only the terminator is a valid, meaningful frame and
    /// is yielded as an empty string rather than silently discarded.
    pub fn next_line(&mut self) -> Option<String> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=nl).collect();
        // Drop the LF and an optional preceding CR.
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes buffered but not yet forming a complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
