use std::fmt;

/// Which fixed-layout frame a decode was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Status,
    Config,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Status => f.write_str("status"),
            FrameKind::Config => f.write_str("config"),
        }
    }
}

/// Errors that can occur while decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is shorter than its fixed length.
    #[error("malformed {kind} frame ({actual} bytes, expected {expected})")]
    MalformedFrame {
        kind: FrameKind,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
