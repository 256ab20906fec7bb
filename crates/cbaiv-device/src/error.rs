use std::time::Duration;

use cbaiv_protocol::ProtocolError;
use cbaiv_transport::TransportError;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No USB backend is installed or registered.
    #[error("USB transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The requested serial number or device index is not attached.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// No configuration response arrived within the bound.
    #[error("no config response within {0:?}")]
    HandshakeTimeout(Duration),

    /// No status response arrived within the bound.
    #[error("no status response within {0:?}")]
    CommunicationTimeout(Duration),

    /// A response frame was shorter than its fixed length.
    #[error(transparent)]
    MalformedFrame(#[from] ProtocolError),

    /// Other transport-level failure.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A start argument cannot be represented on the wire.
    #[error("invalid {name} setpoint: {value}")]
    InvalidSetpoint { name: &'static str, value: f64 },

    /// The watchdog worker thread could not be created.
    #[error("failed to spawn watchdog: {0}")]
    WatchdogSpawn(std::io::Error),
}

impl From<TransportError> for DeviceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => DeviceError::TransportUnavailable(reason),
            TransportError::NotFound(id) => DeviceError::DeviceNotFound(id.to_string()),
            other => DeviceError::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
