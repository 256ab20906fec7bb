use cbaiv_protocol::StatusFrame;
use serde::Serialize;

/// One decoded reading, in real units.
///
/// `Default` is the "device offline" reading: no voltage, no load, no flags.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DeviceStatus {
    /// Battery voltage in volts.
    pub voltage: f64,
    /// Target current in amps (0.0 when no test is running).
    pub set_current: f64,
    /// Current the unit reports drawing, in amps.
    pub measured_current: f64,
    pub running: bool,
    pub power_limited: bool,
    pub high_temp: bool,
}

impl From<&StatusFrame> for DeviceStatus {
    fn from(frame: &StatusFrame) -> Self {
        Self {
            voltage: frame.voltage(),
            set_current: frame.set_current(),
            measured_current: frame.measured_current(),
            running: frame.is_running(),
            power_limited: frame.is_power_limited(),
            high_temp: frame.is_high_temp(),
        }
    }
}

impl From<StatusFrame> for DeviceStatus {
    fn from(frame: StatusFrame) -> Self {
        Self::from(&frame)
    }
}
