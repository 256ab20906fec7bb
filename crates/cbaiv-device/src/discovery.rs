//! Finding and opening analyzers.

use cbaiv_transport::{BackendRegistry, DeviceId};

use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::handshake::request_config;
use crate::session::DeviceSession;

/// Diagnostic reported by [`test`] when the USB stack works but nothing is
/// plugged in.
pub const NO_DEVICES_FOUND: &str = "No CBAs found";

/// An attached analyzer that answered the config handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub serial: u32,
}

/// Enumerate attached analyzers with default timing.
pub fn discover(registry: &BackendRegistry) -> Result<Vec<DiscoveredDevice>> {
    discover_with_config(registry, &SessionConfig::default())
}

/// Enumerate attached analyzers.
///
/// Each device is opened, asked for its configuration, and closed again.
/// No stop frame is sent, so a test another process is running is left
/// alone. Devices that fail to open or answer, or report serial 0, are
/// skipped.
pub fn discover_with_config(
    registry: &BackendRegistry,
    config: &SessionConfig,
) -> Result<Vec<DiscoveredDevice>> {
    let ids = registry.scan()?;
    let mut found = Vec::with_capacity(ids.len());

    for id in ids {
        let mut transport = match registry.open(&id) {
            Ok(transport) => transport,
            Err(err) => {
                tracing::debug!(device = %id, error = %err, "skipping device that failed to open");
                continue;
            }
        };

        let handshake = request_config(&mut *transport, config);
        transport.close();

        match handshake {
            Ok(device_config) if device_config.serial_number() != 0 => {
                found.push(DiscoveredDevice {
                    id,
                    serial: device_config.serial_number(),
                });
            }
            Ok(_) => tracing::debug!(device = %id, "skipping device without serial"),
            Err(err) => tracing::debug!(device = %id, error = %err, "skipping silent device"),
        }
    }

    tracing::debug!(count = found.len(), "scan complete");
    Ok(found)
}

/// Serial numbers of all attached analyzers, in enumeration order.
pub fn scan(registry: &BackendRegistry) -> Result<Vec<u32>> {
    Ok(discover(registry)?
        .into_iter()
        .map(|device| device.serial)
        .collect())
}

/// Check that the USB stack works and at least one analyzer is attached.
///
/// Returns `None` when healthy, otherwise a human-readable diagnostic.
pub fn test(registry: &BackendRegistry) -> Option<String> {
    if let Some(diag) = registry.test() {
        return Some(diag);
    }
    match scan(registry) {
        Ok(serials) if serials.is_empty() => Some(NO_DEVICES_FOUND.to_string()),
        Ok(_) => None,
        Err(err) => Some(err.to_string()),
    }
}

/// Open a session with default timing. See [`connect_with_config`].
pub fn connect(registry: &BackendRegistry, serial: Option<u32>) -> Result<DeviceSession> {
    connect_with_config(registry, serial, SessionConfig::default())
}

/// Open a session on the first attached analyzer, or on the one whose
/// handshake reports `serial`.
pub fn connect_with_config(
    registry: &BackendRegistry,
    serial: Option<u32>,
    config: SessionConfig,
) -> Result<DeviceSession> {
    let ids = registry.scan()?;

    let Some(wanted) = serial else {
        let id = ids
            .first()
            .ok_or_else(|| DeviceError::DeviceNotFound(NO_DEVICES_FOUND.to_string()))?;
        tracing::debug!(device = %id, "connecting to first device");
        return Ok(DeviceSession::open_with_config(registry.open(id)?, config));
    };

    for id in &ids {
        let transport = match registry.open(id) {
            Ok(transport) => transport,
            Err(err) => {
                tracing::debug!(device = %id, error = %err, "skipping device that failed to open");
                continue;
            }
        };
        let mut session = DeviceSession::open_with_config(transport, config);
        if session.serial_number() == wanted {
            tracing::debug!(device = %id, serial = wanted, "connected");
            return Ok(session);
        }
        session.close();
    }

    Err(DeviceError::DeviceNotFound(format!("serial {wanted}")))
}
