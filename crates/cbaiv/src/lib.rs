//! Host driver for West Mountain Radio CBA IV battery analyzers.
//!
//! cbaiv drives the analyzer over USB: it finds attached units, starts and
//! stops constant-current discharge tests, and reads back battery voltage and
//! load current while a background watchdog keeps the unit's safety timer fed.
//!
//! # Crate Structure
//!
//! - [`transport`]: USB transport contract and backend registry
//! - [`protocol`]: fixed-layout command/response frame codec
//! - [`device`]: sessions, watchdog and status cache (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use cbaiv_transport::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use cbaiv_protocol::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use cbaiv_device::*;
}
