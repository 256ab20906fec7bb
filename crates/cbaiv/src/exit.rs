use std::fmt;
use std::io;

use cbaiv_device::DeviceError;
use cbaiv_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::NotFound(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::TransportUnavailable(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        DeviceError::DeviceNotFound(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        DeviceError::HandshakeTimeout(_) | DeviceError::CommunicationTimeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        DeviceError::MalformedFrame(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        DeviceError::InvalidSetpoint { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        DeviceError::WatchdogSpawn(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cbaiv_protocol::{FrameKind, ProtocolError};

    use super::*;

    #[test]
    fn device_errors_map_to_exit_codes() {
        let cases = [
            (DeviceError::TransportUnavailable("none".into()), TRANSPORT_ERROR),
            (DeviceError::DeviceNotFound("serial 9".into()), FAILURE),
            (DeviceError::HandshakeTimeout(Duration::from_secs(1)), TIMEOUT),
            (DeviceError::CommunicationTimeout(Duration::from_secs(1)), TIMEOUT),
            (
                DeviceError::MalformedFrame(ProtocolError::MalformedFrame {
                    kind: FrameKind::Status,
                    expected: 65,
                    actual: 3,
                }),
                DATA_INVALID,
            ),
            (
                DeviceError::InvalidSetpoint {
                    name: "amps",
                    value: -1.0,
                },
                USAGE,
            ),
            (DeviceError::Transport(TransportError::Closed), TRANSPORT_ERROR),
        ];

        for (err, code) in cases {
            assert_eq!(device_error("ctx", err).code, code);
        }
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err = TransportError::Io(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(transport_error("write", err).code, TIMEOUT);
    }
}
