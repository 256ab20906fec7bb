//! USB transport contract for CBA IV battery analyzers.
//!
//! Provides a unified interface over the two ways the analyzer can be
//! reached from a host:
//! - the generic bulk-endpoint USB stack (libusb / WinUSB)
//! - the legacy Microchip vendor driver (`mpusbapi`)
//!
//! This is the lowest layer of cbaiv. The protocol and session layers only
//! ever see the [`Transport`] and [`Backend`] traits defined here; the
//! concrete backends are plugged in through a [`BackendRegistry`].

pub mod error;
pub mod registry;
pub mod traits;

pub use error::{Result, TransportError};
pub use registry::BackendRegistry;
pub use traits::{Backend, BackendKind, DeviceId, Transport};

/// USB vendor id of West Mountain Radio analyzers.
pub const USB_VENDOR_ID: u16 = 0x2405;

/// USB product id of the CBA IV.
pub const USB_PRODUCT_ID: u16 = 0x0005;
