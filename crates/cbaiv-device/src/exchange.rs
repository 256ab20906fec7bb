use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cbaiv_protocol::opcode::opcode_name;
use cbaiv_transport::Transport;

use crate::config::SessionConfig;
use crate::error::Result;

/// Pause between empty reads while waiting for a response.
const READ_RETRY_PAUSE: Duration = Duration::from_millis(1);

/// The session's transport, shared with at most one watchdog.
pub(crate) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub(crate) fn shared(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Lock the transport. A panic while holding the lock cannot leave a
/// half-written frame behind, so a poisoned lock is still usable.
pub(crate) fn lock(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write `command` and wait for a response frame starting with `expect`.
///
/// Returns `Ok(None)` when nothing matching arrived within
/// `config.response_timeout`, or when the transport is no longer valid.
pub(crate) fn transact(
    transport: &mut dyn Transport,
    command: &[u8],
    expect: u8,
    config: &SessionConfig,
) -> Result<Option<Bytes>> {
    if !transport.is_valid() {
        return Ok(None);
    }

    let written = transport.write(command, config.write_timeout)?;
    tracing::trace!(
        opcode = command.first().map_or("EMPTY", |&op| opcode_name(op)),
        len = command.len(),
        written,
        "frame written"
    );

    wait_for(transport, expect, config.response_timeout)
}

/// Read until a frame whose first byte is `expect` arrives or `timeout`
/// elapses. Frames with any other opcode are discarded.
pub(crate) fn wait_for(
    transport: &mut dyn Transport,
    expect: u8,
    timeout: Duration,
) -> Result<Option<Bytes>> {
    if !transport.is_valid() {
        return Ok(None);
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(frame) = transport.read(remaining)? {
            match frame.first() {
                Some(&op) if op == expect => {
                    tracing::trace!(opcode = opcode_name(op), len = frame.len(), "frame read");
                    return Ok(Some(frame));
                }
                Some(&op) => {
                    tracing::trace!(
                        opcode = opcode_name(op),
                        expected = opcode_name(expect),
                        "discarding unexpected frame"
                    );
                }
                None => {}
            }
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(READ_RETRY_PAUSE);
    }
}
