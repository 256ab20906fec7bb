use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// The family a backend belongs to.
///
/// Ordering matters: the registry enumerates legacy vendor-driver devices
/// before generic USB devices, so a device keeps the same index whichever
/// host it was first seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    /// Legacy vendor driver reached through its documented entry points
    /// (version query, device count, open, read, write, close).
    Legacy,
    /// Generic bulk/interrupt endpoint USB stack.
    Generic,
    /// In-process stand-in for real hardware.
    Simulated,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Legacy => "legacy",
            BackendKind::Generic => "generic",
            BackendKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one enumerable device: the backend that sees it and the
/// backend-local instance index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    backend: &'static str,
    index: usize,
}

impl DeviceId {
    pub fn new(backend: &'static str, index: usize) -> Self {
        Self { backend, index }
    }

    /// Name of the backend that enumerated this device.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Instance index within that backend.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.backend, self.index)
    }
}

/// An open byte pipe to one analyzer.
///
/// Implementations must tolerate `close()` being called more than once and
/// must report `is_valid() == false` afterwards. Once closed, `read` returns
/// `Ok(None)` and `write` returns `Ok(0)` rather than failing.
pub trait Transport: Send {
    /// Write a complete command frame, waiting up to `timeout` for the
    /// endpoint. Returns the number of bytes written.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Read one response frame, waiting up to `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn read(&mut self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Whether the handle is open and usable.
    fn is_valid(&self) -> bool;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);
}

/// A source of analyzer connections (one USB stack).
pub trait Backend: Send + Sync {
    /// Short name used in identifiers and diagnostics.
    fn name(&self) -> &'static str;

    /// Which family this backend belongs to.
    fn kind(&self) -> BackendKind;

    /// Self-test of the backend's library.
    ///
    /// Returns `None` when healthy, or a human-readable diagnostic.
    fn test(&self) -> Option<String>;

    /// Number of matching devices currently attached.
    fn device_count(&self) -> Result<usize>;

    /// Open the device at `index` (`0..device_count()`).
    fn open(&self, index: usize) -> Result<Box<dyn Transport>>;
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn test(&self) -> Option<String> {
        (**self).test()
    }

    fn device_count(&self) -> Result<usize> {
        (**self).device_count()
    }

    fn open(&self, index: usize) -> Result<Box<dyn Transport>> {
        (**self).open(index)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        (**self).read(timeout)
    }

    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
