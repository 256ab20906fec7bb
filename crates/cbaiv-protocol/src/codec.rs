use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{FrameKind, ProtocolError, Result};
use crate::opcode::{CONFIG_REQUEST, SET_STATUS};

/// Host-to-device command frame length.
pub const COMMAND_FRAME_SIZE: usize = 16;

/// Device-to-host response frame length.
pub const RESPONSE_FRAME_SIZE: usize = 65;

/// Fixed-point scale for amps and volts on the wire.
pub const MICRO_SCALE: f64 = 1_000_000.0;

/// Flag bits carried in byte 1 of command and status frames.
pub mod flags {
    /// Command: stop drawing current.
    pub const STOP: u8 = 0x01;
    /// Command: run a test. Status: a test is running.
    pub const RUNNING: u8 = 0x02;
    /// Status only: load is being limited to stay inside the power envelope.
    pub const POWER_LIMITED: u8 = 0x10;
    /// Status only: test aborted because the unit overheated.
    pub const HIGH_TEMP: u8 = 0x20;
    /// Command: honour the vstop threshold.
    pub const VSTOP_ENABLED: u8 = 0x40;
}

// Command frame layout.
const CMD_FLAGS: usize = 1;
const CMD_LOAD: usize = 3;
const CMD_VSTOP: usize = 12;

// Status frame layout.
const STATUS_FLAGS: usize = 1;
const STATUS_SET_CURRENT: usize = 3;
const STATUS_MEASURED_CURRENT: usize = 16;
const STATUS_VOLTAGE: usize = 20;

// Config frame layout.
const CONFIG_SERIAL: usize = 4;

/// Convert a real quantity to wire micro-units.
///
/// Rounds to the nearest micro-unit. Negative and NaN inputs map to 0 and
/// values beyond `u32::MAX` micro-units saturate; callers validate ranges
/// before encoding.
pub fn to_micro(value: f64) -> u32 {
    (value * MICRO_SCALE).round() as u32
}

/// Convert wire micro-units back to a real quantity.
pub fn from_micro(raw: u32) -> f64 {
    f64::from(raw) / MICRO_SCALE
}

/// A 16-byte host command.
///
/// ```text
/// ┌────────┬───────┬─────┬──────────────┬───────────────────┬─────┬──────────────┐
/// │ [0]    │ [1]   │ [2] │ [3..7)       │ [7..11)           │[11] │ [12..16)     │
/// │ opcode │ flags │ rsv │ load µA (LE) │ fan/LED1/LED2/TRIS│ IO  │ vstop µV (LE)│
/// └────────┴───────┴─────┴──────────────┴───────────────────┴─────┴──────────────┘
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    raw: [u8; COMMAND_FRAME_SIZE],
}

impl CommandFrame {
    fn set_status(flags: u8, load: u32, vstop: u32) -> Self {
        let mut raw = [0u8; COMMAND_FRAME_SIZE];
        {
            let mut dst = &mut raw[..];
            dst.put_u8(SET_STATUS);
            dst.put_u8(flags);
            dst.put_u8(0);
            dst.put_u32_le(load);
        }
        (&mut raw[CMD_VSTOP..]).put_u32_le(vstop);
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn opcode(&self) -> u8 {
        self.raw[0]
    }

    pub fn flags(&self) -> u8 {
        self.raw[CMD_FLAGS]
    }

    /// Load setpoint in micro-amps.
    pub fn load_micro(&self) -> u32 {
        read_u32_le(&self.raw, CMD_LOAD)
    }

    /// Stop threshold in micro-volts.
    pub fn vstop_micro(&self) -> u32 {
        read_u32_le(&self.raw, CMD_VSTOP)
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFrame")
            .field("opcode", &format_args!("{:#04x}", self.opcode()))
            .field("flags", &format_args!("{:#04x}", self.flags()))
            .field("load_micro", &self.load_micro())
            .field("vstop_micro", &self.vstop_micro())
            .finish()
    }
}

/// The single-byte configuration request.
pub fn encode_config_request() -> [u8; 1] {
    [CONFIG_REQUEST]
}

/// Start (or retarget) a test drawing `amps`, aborting below `vstop` volts.
///
/// A `vstop` of zero disables the threshold.
pub fn encode_start(amps: f64, vstop: f64) -> CommandFrame {
    let mut flag_bits = flags::STOP | flags::RUNNING;
    if vstop != 0.0 {
        flag_bits |= flags::VSTOP_ENABLED;
    }
    CommandFrame::set_status(flag_bits, to_micro(amps), to_micro(vstop))
}

/// End the running test.
pub fn encode_stop() -> CommandFrame {
    CommandFrame::set_status(flags::STOP, 0, 0)
}

/// Hold the current load without issuing a new target.
pub fn encode_keepalive() -> CommandFrame {
    CommandFrame::set_status(0, 0, 0)
}

/// A decoded 65-byte status response.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    raw: [u8; RESPONSE_FRAME_SIZE],
}

impl StatusFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn flags(&self) -> u8 {
        self.raw[STATUS_FLAGS]
    }

    /// Whether a test is running and the unit is drawing current.
    pub fn is_running(&self) -> bool {
        self.flags() & flags::RUNNING != 0
    }

    /// Whether the unit is holding the load below target to respect its
    /// power or current limits.
    pub fn is_power_limited(&self) -> bool {
        self.flags() & flags::POWER_LIMITED != 0
    }

    /// Whether the test was aborted for over-temperature.
    pub fn is_high_temp(&self) -> bool {
        self.flags() & flags::HIGH_TEMP != 0
    }

    /// Target current in amps; 0.0 whenever no test is running.
    pub fn set_current(&self) -> f64 {
        if !self.is_running() {
            return 0.0;
        }
        from_micro(read_u32_le(&self.raw, STATUS_SET_CURRENT))
    }

    /// Current the unit reports drawing, in amps.
    ///
    /// The feedback ADC spans the whole range in 10 bits, so this is only
    /// good for spotting gross faults (blown fuse, power limiting).
    pub fn measured_current(&self) -> f64 {
        from_micro(read_u32_le(&self.raw, STATUS_MEASURED_CURRENT))
    }

    /// Battery voltage in volts.
    pub fn voltage(&self) -> f64 {
        from_micro(read_u32_le(&self.raw, STATUS_VOLTAGE))
    }
}

impl fmt::Debug for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusFrame")
            .field("flags", &format_args!("{:#04x}", self.flags()))
            .field("set_current", &self.set_current())
            .field("measured_current", &self.measured_current())
            .field("voltage", &self.voltage())
            .finish()
    }
}

/// A decoded 65-byte configuration block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConfigFrame {
    raw: [u8; RESPONSE_FRAME_SIZE],
}

impl ConfigFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Serial number printed on the unit's label.
    pub fn serial_number(&self) -> u32 {
        read_u32_le(&self.raw, CONFIG_SERIAL)
    }
}

impl fmt::Debug for ConfigFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFrame")
            .field("serial_number", &self.serial_number())
            .finish()
    }
}

/// Decode a status response. Bytes past the fixed length are ignored.
pub fn decode_status(bytes: &[u8]) -> Result<StatusFrame> {
    let raw = fixed_frame(bytes, FrameKind::Status)?;
    Ok(StatusFrame { raw })
}

/// Decode a configuration response. Bytes past the fixed length are ignored.
pub fn decode_config(bytes: &[u8]) -> Result<ConfigFrame> {
    let raw = fixed_frame(bytes, FrameKind::Config)?;
    Ok(ConfigFrame { raw })
}

fn fixed_frame(bytes: &[u8], kind: FrameKind) -> Result<[u8; RESPONSE_FRAME_SIZE]> {
    if bytes.len() < RESPONSE_FRAME_SIZE {
        return Err(ProtocolError::MalformedFrame {
            kind,
            expected: RESPONSE_FRAME_SIZE,
            actual: bytes.len(),
        });
    }
    let mut raw = [0u8; RESPONSE_FRAME_SIZE];
    raw.copy_from_slice(&bytes[..RESPONSE_FRAME_SIZE]);
    Ok(raw)
}

fn read_u32_le(raw: &[u8], offset: usize) -> u32 {
    (&raw[offset..offset + 4]).get_u32_le()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::STATUS_RESPONSE;

    fn status_bytes(flags: u8) -> [u8; RESPONSE_FRAME_SIZE] {
        let mut raw = [0u8; RESPONSE_FRAME_SIZE];
        raw[0] = STATUS_RESPONSE;
        raw[1] = flags;
        raw
    }

    #[test]
    fn start_frame_layout() {
        let frame = encode_start(0.15, 0.0);
        assert_eq!(frame.as_bytes().len(), COMMAND_FRAME_SIZE);
        assert_eq!(frame.opcode(), SET_STATUS);
        assert_eq!(frame.flags(), 0x03);
        assert_eq!(frame.load_micro(), 150_000);
        assert_eq!(&frame.as_bytes()[3..7], &150_000u32.to_le_bytes());
        assert_eq!(frame.vstop_micro(), 0);
        assert!(frame.as_bytes()[7..12].iter().all(|&b| b == 0));
    }

    #[test]
    fn start_with_vstop_sets_flag() {
        let frame = encode_start(2.0, 10.5);
        assert_eq!(frame.flags(), 0x43);
        assert_eq!(frame.load_micro(), 2_000_000);
        assert_eq!(frame.vstop_micro(), 10_500_000);
        assert_eq!(&frame.as_bytes()[12..16], &10_500_000u32.to_le_bytes());
    }

    #[test]
    fn stop_and_keepalive_frames() {
        let stop = encode_stop();
        assert_eq!(stop.opcode(), SET_STATUS);
        assert_eq!(stop.flags(), 0x01);
        assert!(stop.as_bytes()[2..].iter().all(|&b| b == 0));

        let keepalive = encode_keepalive();
        assert_eq!(keepalive.opcode(), SET_STATUS);
        assert!(keepalive.as_bytes()[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn config_request_is_single_byte() {
        assert_eq!(encode_config_request(), [0x43]);
    }

    #[test]
    fn scaling_rounds_to_nearest_micro_unit() {
        // 0.1 * 1e6 is 99999.99999999999 in binary floating point.
        assert_eq!(to_micro(0.1), 100_000);
        assert_eq!(to_micro(0.000_001), 1);
        assert_eq!(to_micro(12.345_678), 12_345_678);
        assert_eq!(from_micro(1_500_000), 1.5);
    }

    #[test]
    fn scaling_saturates_out_of_range() {
        assert_eq!(to_micro(-1.0), 0);
        assert_eq!(to_micro(f64::NAN), 0);
        assert_eq!(to_micro(1e12), u32::MAX);
    }

    #[test]
    fn decode_voltage() {
        let mut raw = status_bytes(0);
        raw[20..24].copy_from_slice(&[0x40, 0x42, 0x0f, 0x00]);
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.voltage(), 1.0);
    }

    #[test]
    fn set_current_requires_running_bit() {
        let mut raw = status_bytes(0x00);
        raw[3..7].copy_from_slice(&2_500_000u32.to_le_bytes());
        let idle = decode_status(&raw).unwrap();
        assert_eq!(idle.set_current(), 0.0);
        assert!(!idle.is_running());

        raw[1] = flags::RUNNING;
        let running = decode_status(&raw).unwrap();
        assert_eq!(running.set_current(), 2.5);
        assert!(running.is_running());
    }

    #[test]
    fn measured_current_is_independent_of_running() {
        let mut raw = status_bytes(0x00);
        raw[16..20].copy_from_slice(&750_000u32.to_le_bytes());
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.measured_current(), 0.75);
    }

    #[test]
    fn limit_flags_are_independent() {
        let power = decode_status(&status_bytes(flags::POWER_LIMITED)).unwrap();
        assert!(power.is_power_limited());
        assert!(!power.is_high_temp());

        let temp = decode_status(&status_bytes(flags::HIGH_TEMP)).unwrap();
        assert!(!temp.is_power_limited());
        assert!(temp.is_high_temp());

        let both = decode_status(&status_bytes(flags::POWER_LIMITED | flags::HIGH_TEMP)).unwrap();
        assert!(both.is_power_limited());
        assert!(both.is_high_temp());
    }

    #[test]
    fn short_status_is_malformed() {
        let err = decode_status(&[STATUS_RESPONSE; 64]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MalformedFrame {
                kind: FrameKind::Status,
                expected: 65,
                actual: 64,
            }
        );
    }

    #[test]
    fn long_status_is_truncated() {
        let mut raw = vec![0u8; 80];
        raw[1] = flags::RUNNING;
        let status = decode_status(&raw).unwrap();
        assert_eq!(status.as_bytes().len(), RESPONSE_FRAME_SIZE);
        assert!(status.is_running());
    }

    #[test]
    fn config_serial_number() {
        let mut raw = [0u8; RESPONSE_FRAME_SIZE];
        raw[4..8].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(decode_config(&raw).unwrap().serial_number(), 1);

        raw[4..8].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(decode_config(&raw).unwrap().serial_number(), 0x1234_5678);
    }

    #[test]
    fn short_config_is_malformed() {
        assert!(matches!(
            decode_config(&[0x63]),
            Err(ProtocolError::MalformedFrame {
                kind: FrameKind::Config,
                ..
            })
        ));
    }
}
