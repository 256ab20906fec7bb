//! High-level session management for the CBA IV battery analyzer.
//!
//! This is the "just works" layer. Open a device, start a constant-current
//! test, read back voltage and current, stop. While a test is running a
//! background watchdog keeps the device's safety timer fed and caches the
//! latest status so foreground queries never touch the USB pipe.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handshake;
pub mod session;
pub mod status;
pub mod watchdog;

mod exchange;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use cache::{status_cache, StatusCache, StatusPublisher};
pub use config::SessionConfig;
pub use discovery::{
    connect, connect_with_config, discover, discover_with_config, scan, test, DiscoveredDevice,
    NO_DEVICES_FOUND,
};
pub use error::{DeviceError, Result};
pub use handshake::request_config;
pub use session::DeviceSession;
pub use status::DeviceStatus;
pub use watchdog::{WatchdogMonitor, WatchdogState};
