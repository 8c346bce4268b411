//! Shared scripted-device mock for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use enigmactl_core::protocol::{Channel, ProtocolError, Session, SessionConfig};

/// Log of every write the session made, in order.
pub type WriteLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Install a test subscriber once so `RUST_LOG` surfaces protocol traces.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bytes another thread pushes to simulate device-initiated traffic
/// (a bystander pressing keys on the machine).
pub type Injector = Arc<Mutex<VecDeque<u8>>>;

/// A mock device: records writes, replies through a scripted responder,
/// and surfaces injected unsolicited traffic.
pub struct ScriptedDevice {
    rx: VecDeque<u8>,
    writes: WriteLog,
    responder: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,
    injector: Injector,
}

impl ScriptedDevice {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> (Self, WriteLog) {
        let (device, writes, _) = Self::with_injector(responder);
        (device, writes)
    }

    pub fn with_injector(
        responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    ) -> (Self, WriteLog, Injector) {
        let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
        let injector: Injector = Arc::new(Mutex::new(VecDeque::new()));
        (
            Self {
                rx: VecDeque::new(),
                writes: writes.clone(),
                responder: Box::new(responder),
                injector: injector.clone(),
            },
            writes,
            injector,
        )
    }

    fn drain_injected(&mut self) {
        let mut injected = self.injector.lock().unwrap();
        self.rx.extend(injected.drain(..));
    }
}

impl Channel for ScriptedDevice {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        self.writes.lock().unwrap().push(buf.to_vec());
        let reply = (self.responder)(buf);
        self.rx.extend(reply);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> Result<u32, ProtocolError> {
        self.drain_injected();
        Ok(self.rx.len() as u32)
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.rx.clear();
        Ok(())
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        query_timeout: Duration::from_millis(50),
        char_timeout: Duration::from_millis(50),
        quiet_window: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
    }
}

/// Session over a scripted device with timeouts shrunk for tests.
pub fn scripted_session(
    responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
) -> (Session, WriteLog) {
    let (device, writes) = ScriptedDevice::new(responder);
    (Session::with_channel(Box::new(device), fast_config()), writes)
}

/// Like [`scripted_session`], with an injector for unsolicited traffic.
pub fn scripted_session_with_injector(
    responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static,
) -> (Session, WriteLog, Injector) {
    let (device, writes, injector) = ScriptedDevice::with_injector(responder);
    (
        Session::with_channel(Box::new(device), fast_config()),
        writes,
        injector,
    )
}

/// True when the write contains the given byte sequence.
pub fn write_contains(write: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && write.windows(needle.len()).any(|w| w == needle)
}

/// Command bodies of all framed writes, e.g. `["?VE", "!MO I"]`.
pub fn framed_bodies(writes: &WriteLog) -> Vec<String> {
    writes
        .lock()
        .unwrap()
        .iter()
        .filter(|w| w.starts_with(b"\r\n") && w.ends_with(b"\r\n") && w.len() > 4)
        .map(|w| String::from_utf8_lossy(&w[2..w.len() - 2]).into_owned())
        .collect()
}

/// All single-byte writes, i.e. characters streamed to the machine.
pub fn streamed_chars(writes: &WriteLog) -> Vec<char> {
    writes
        .lock()
        .unwrap()
        .iter()
        .filter(|w| w.len() == 1)
        .map(|w| w[0] as char)
        .collect()
}
