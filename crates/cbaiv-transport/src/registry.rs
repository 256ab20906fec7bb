use std::sync::Arc;

use crate::error::{Result, TransportError};
use crate::traits::{Backend, DeviceId, Transport};

/// The set of USB backends available to this process.
///
/// This is the factory step that hides which stack a device is reached
/// through: callers enumerate and open by [`DeviceId`], and get back a
/// `Box<dyn Transport>` without knowing the concrete backend.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Backends are kept ordered by [`BackendKind`]
    /// (legacy first), with registration order breaking ties.
    ///
    /// [`BackendKind`]: crate::BackendKind
    pub fn register(&mut self, backend: impl Backend + 'static) -> &mut Self {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        let pos = self
            .backends
            .iter()
            .position(|existing| existing.kind() > backend.kind())
            .unwrap_or(self.backends.len());
        tracing::debug!(backend = backend.name(), kind = %backend.kind(), "registered backend");
        self.backends.insert(pos, backend);
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.register(backend);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Registered backends, in enumeration order.
    pub fn backends(&self) -> impl Iterator<Item = &dyn Backend> {
        self.backends.iter().map(|b| b.as_ref())
    }

    /// Self-test the USB stack.
    ///
    /// Healthy (`None`) as long as at least one backend's library works;
    /// otherwise a diagnostic naming what is missing.
    pub fn test(&self) -> Option<String> {
        if self.backends.is_empty() {
            return Some("no USB transport backends registered".to_string());
        }

        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.test() {
                None => return None,
                Some(diag) => failures.push(format!("{}: {diag}", backend.name())),
            }
        }
        Some(format!(
            "USB libraries not found or not installed ({})",
            failures.join("; ")
        ))
    }

    /// Enumerate attached devices across all backends, in stable order.
    ///
    /// A backend that fails to count its devices contributes none.
    pub fn scan(&self) -> Result<Vec<DeviceId>> {
        if self.backends.is_empty() {
            return Err(TransportError::Unavailable(
                "no USB transport backends registered".to_string(),
            ));
        }

        let mut ids = Vec::new();
        for backend in &self.backends {
            match backend.device_count() {
                Ok(count) => {
                    ids.extend((0..count).map(|index| DeviceId::new(backend.name(), index)));
                }
                Err(err) => {
                    tracing::debug!(backend = backend.name(), error = %err, "device count failed");
                }
            }
        }
        Ok(ids)
    }

    /// Open a device previously returned by [`scan`](Self::scan).
    pub fn open(&self, id: &DeviceId) -> Result<Box<dyn Transport>> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.name() == id.backend())
            .ok_or_else(|| TransportError::NotFound(id.clone()))?;

        let count = backend.device_count()?;
        if id.index() >= count {
            return Err(TransportError::NotFound(id.clone()));
        }

        tracing::debug!(device = %id, "opening transport");
        backend.open(id.index())
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}
