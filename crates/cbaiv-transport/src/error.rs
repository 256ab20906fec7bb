use crate::traits::DeviceId;

/// Errors that can occur in USB transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No usable backend library is installed, or none is registered.
    #[error("USB transport unavailable: {0}")]
    Unavailable(String),

    /// The requested device identifier is not present.
    #[error("device {0} not found")]
    NotFound(DeviceId),

    /// A backend-specific failure (driver call returned an error code).
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    /// An I/O error occurred on the endpoint pipe.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport handle has been closed.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
